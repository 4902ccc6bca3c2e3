//! Symbolic names
//!
//! Names identify constants, relations and lemmas (`Nat.add`, `Eq.refl`).
//! The simplifier never splits a name into components, so names are stored
//! as a single interned segment rather than a cons list of parts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// An interned symbolic name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Name(Arc::from(s.as_str())))
    }
}

impl Name {
    /// The anonymous name.
    pub fn anon() -> Self {
        Name(Arc::from(""))
    }

    /// Create a name from a string (e.g. `"Nat.add"`).
    pub fn from_string(s: &str) -> Self {
        Name(Arc::from(s))
    }

    /// Check whether this is the anonymous name.
    pub fn is_anon(&self) -> bool {
        self.0.is_empty()
    }

    /// View the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anon() {
            write!(f, "[anonymous]")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::from_string(s)
    }
}
