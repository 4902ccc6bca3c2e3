//! simp5 Kernel - Terms and Trusted Type Checking
//!
//! This crate implements the term language the simplifier rewrites over,
//! together with the trusted collaborators the simplifier consumes:
//!
//! - Symbolic names (`name.rs`)
//! - Universe levels (`level.rs`)
//! - Expression representation (`expr.rs`)
//! - Environment with declarations and the simp-relation registry (`env.rs`)
//! - Type checker and definitional equality (`tc.rs`)
//!
//! Every proof object produced by the simplifier must type check against
//! this crate's `TypeChecker`; nothing in the simplifier itself is trusted.

pub mod env;
pub mod expr;
pub mod level;
pub mod name;
pub mod tc;

pub use env::{ConstantInfo, EnvError, Environment, RelationInfo};
pub use expr::{BinderInfo, Expr, FVarId};
pub use level::Level;
pub use name::Name;
pub use tc::{LocalContext, LocalDecl, TypeChecker, TypeError};
