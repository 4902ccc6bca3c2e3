//! Universe levels
//!
//! Levels stratify the sorts (`Prop = Sort 0`, `Type = Sort 1`, ...).
//! Besides the usual constructors, a level may be a named parameter of a
//! polymorphic declaration or a temporary metavariable allocated while a
//! rewrite lemma is being tried against a term.

use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Universe level
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Level {
    /// Zero (the level of `Prop`)
    Zero,
    /// Successor: l + 1
    Succ(Arc<Level>),
    /// Maximum: max(l1, l2)
    Max(Arc<Level>, Arc<Level>),
    /// Impredicative maximum: imax(l1, l2) = 0 if l2 = 0, else max(l1, l2)
    IMax(Arc<Level>, Arc<Level>),
    /// Universe parameter of a polymorphic declaration
    Param(Name),
    /// Temporary universe metavariable, indexed per lemma attempt
    Meta(u32),
}

impl Level {
    /// Create zero level
    pub fn zero() -> Self {
        Level::Zero
    }

    /// Create successor level
    pub fn succ(l: Level) -> Self {
        Level::Succ(Arc::new(l))
    }

    /// Create max level, simplifying if possible
    pub fn max(l1: Level, l2: Level) -> Self {
        if l1 == l2 || l2.is_zero() {
            return l1;
        }
        if l1.is_zero() {
            return l2;
        }
        if Level::is_geq(&l1, &l2) {
            return l1;
        }
        if Level::is_geq(&l2, &l1) {
            return l2;
        }
        Level::Max(Arc::new(l1), Arc::new(l2))
    }

    /// Create imax level, simplifying if possible
    pub fn imax(l1: Level, l2: Level) -> Self {
        if l2.is_zero() {
            return Level::Zero;
        }
        if matches!(l2, Level::Succ(_)) {
            return Level::max(l1, l2);
        }
        if l1.is_zero() || l1 == l2 {
            return l2;
        }
        Level::IMax(Arc::new(l1), Arc::new(l2))
    }

    /// Create parameter level
    pub fn param(name: Name) -> Self {
        Level::Param(name)
    }

    /// Create a temporary universe metavariable
    pub fn meta(idx: u32) -> Self {
        Level::Meta(idx)
    }

    /// Check if this level is definitely zero
    pub fn is_zero(&self) -> bool {
        match self {
            Level::Zero => true,
            Level::Succ(_) | Level::Param(_) | Level::Meta(_) => false,
            Level::Max(l1, l2) => l1.is_zero() && l2.is_zero(),
            Level::IMax(_, l2) => l2.is_zero(),
        }
    }

    /// Syntactic check: is `l1` provably >= `l2` for all parameter values?
    fn is_geq(l1: &Level, l2: &Level) -> bool {
        if l1 == l2 || l2.is_zero() {
            return true;
        }
        match (l1, l2) {
            (_, Level::Max(a, b)) => Level::is_geq(l1, a) && Level::is_geq(l1, b),
            (Level::Max(a, b), _) => Level::is_geq(a, l2) || Level::is_geq(b, l2),
            (Level::Succ(a), Level::Succ(b)) => Level::is_geq(a, b),
            (Level::Succ(a), _) => Level::is_geq(a, l2),
            _ => false,
        }
    }

    /// Definitional equality of levels after re-normalizing through the
    /// simplifying constructors.
    pub fn is_def_eq(l1: &Level, l2: &Level) -> bool {
        l1.normalize() == l2.normalize()
    }

    /// Rebuild the level through the simplifying constructors.
    pub fn normalize(&self) -> Level {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => self.clone(),
            Level::Succ(l) => Level::succ(l.normalize()),
            Level::Max(l1, l2) => Level::max(l1.normalize(), l2.normalize()),
            Level::IMax(l1, l2) => Level::imax(l1.normalize(), l2.normalize()),
        }
    }

    /// Check whether the level mentions any metavariable
    pub fn has_meta(&self) -> bool {
        match self {
            Level::Meta(_) => true,
            Level::Zero | Level::Param(_) => false,
            Level::Succ(l) => l.has_meta(),
            Level::Max(l1, l2) | Level::IMax(l1, l2) => l1.has_meta() || l2.has_meta(),
        }
    }

    /// Check whether the level mentions any parameter
    pub fn has_param(&self) -> bool {
        match self {
            Level::Param(_) => true,
            Level::Zero | Level::Meta(_) => false,
            Level::Succ(l) => l.has_param(),
            Level::Max(l1, l2) | Level::IMax(l1, l2) => l1.has_param() || l2.has_param(),
        }
    }

    /// Substitute universe parameters.
    pub fn instantiate_params(&self, params: &[Name], levels: &[Level]) -> Level {
        match self {
            Level::Zero | Level::Meta(_) => self.clone(),
            Level::Param(n) => params
                .iter()
                .position(|p| p == n)
                .and_then(|i| levels.get(i))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Level::Succ(l) => Level::succ(l.instantiate_params(params, levels)),
            Level::Max(l1, l2) => Level::max(
                l1.instantiate_params(params, levels),
                l2.instantiate_params(params, levels),
            ),
            Level::IMax(l1, l2) => Level::imax(
                l1.instantiate_params(params, levels),
                l2.instantiate_params(params, levels),
            ),
        }
    }

    /// Substitute universe metavariables through an assignment lookup.
    pub fn instantiate_metas(&self, assign: &impl Fn(u32) -> Option<Level>) -> Level {
        match self {
            Level::Zero | Level::Param(_) => self.clone(),
            Level::Meta(i) => assign(*i).unwrap_or_else(|| self.clone()),
            Level::Succ(l) => Level::succ(l.instantiate_metas(assign)),
            Level::Max(l1, l2) => Level::max(
                l1.instantiate_metas(assign),
                l2.instantiate_metas(assign),
            ),
            Level::IMax(l1, l2) => Level::imax(
                l1.instantiate_metas(assign),
                l2.instantiate_metas(assign),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_simplification() {
        let l = Level::succ(Level::zero());
        assert_eq!(Level::max(Level::zero(), l.clone()), l);
        assert_eq!(Level::max(l.clone(), l.clone()), l);
        assert_eq!(Level::max(Level::succ(l.clone()), l.clone()), Level::succ(l));
    }

    #[test]
    fn test_imax_zero() {
        let u = Level::param(Name::from_string("u"));
        assert_eq!(Level::imax(u.clone(), Level::zero()), Level::zero());
        assert_eq!(
            Level::imax(u.clone(), Level::succ(Level::zero())),
            Level::max(u, Level::succ(Level::zero()))
        );
    }

    #[test]
    fn test_def_eq_normalizes() {
        let u = Level::param(Name::from_string("u"));
        let raw = Level::Max(Arc::new(Level::Zero), Arc::new(u.clone()));
        assert!(Level::is_def_eq(&raw, &u));
    }

    #[test]
    fn test_instantiate_params() {
        let u = Name::from_string("u");
        let l = Level::succ(Level::param(u.clone()));
        let inst = l.instantiate_params(&[u], &[Level::zero()]);
        assert_eq!(inst, Level::succ(Level::zero()));
    }

    #[test]
    fn test_instantiate_metas() {
        let l = Level::max(Level::meta(0), Level::succ(Level::meta(1)));
        let inst = l.instantiate_metas(&|i| match i {
            0 => Some(Level::zero()),
            1 => Some(Level::zero()),
            _ => None,
        });
        assert_eq!(inst, Level::succ(Level::zero()));
    }

    #[test]
    fn test_has_meta() {
        assert!(Level::meta(3).has_meta());
        assert!(!Level::succ(Level::zero()).has_meta());
    }
}
