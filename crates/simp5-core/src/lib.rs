//! simp5 Core - Proof-Producing Term Simplifier
//!
//! Given a term `e` and a registered equivalence relation `~`, the
//! simplifier produces a normal form `e'` together with a proof of
//! `e ~ e'` that type checks against the `simp5-kernel` checker. Rewriting
//! is driven by an indexed database of rewrite and congruence lemmas,
//! synthesized congruence over applications, binder congruence via
//! extensionality axioms, and user hooks for pre/post rewriting and
//! side-condition discharge.
//!
//! # Architecture
//!
//! - Simp results and their composition (`result.rs`)
//! - Temporary metavariable contexts and pattern matching (`meta.rs`)
//! - The simplifier's view of the type context (`ctx.rs`)
//! - Class-instance synthesis (`instances.rs`)
//! - Lemma compilation and the head-pattern index (`lemmas.rs`)
//! - The canonical term order for permutation rewrites (`order.rs`)
//! - Proof combinators (`app_builder.rs`)
//! - Synthesized congruence over applications (`congr.rs`)
//! - Defeq canonicalization and cast elision (`canonize.rs`)
//! - Pre/post/prove hook capability (`hooks.rs`)
//! - The driver (`simplify.rs`)

pub mod app_builder;
pub mod canonize;
pub mod congr;
pub mod ctx;
pub mod hooks;
pub mod instances;
pub mod lemmas;
pub mod meta;
pub mod order;
pub mod result;
pub mod simplify;

pub use app_builder::AppBuilderError;
pub use canonize::DefeqCanonizer;
pub use congr::{CongrArgKind, CongrSimpLemma};
pub use ctx::SimpCtx;
pub use hooks::{HookResult, Hooks, NoHooks};
pub use instances::InstanceTable;
pub use lemmas::{LemmaError, SimpLemma, SimpLemmaIndex};
pub use result::SimpResult;
pub use simplify::{ext_simplify, prove_by_simp, simplify, SimpConfig, SimpError, Simplifier};
