//! Pre/post/prove hook capability
//!
//! The simplifier is parametric over a `{pre, post, prove}` capability
//! set. The plain variant uses `NoHooks` and the built-in rewriting in
//! `post` position; the script-driven variant supplies a hook object that
//! owns whatever accumulator state it threads through the traversal and
//! takes over `pre`/`post` entirely.

use simp5_kernel::{Expr, Name};

use crate::ctx::SimpCtx;
use crate::lemmas::SimpLemmaIndex;
use crate::result::SimpResult;

/// Outcome of a pre or post hook.
#[derive(Clone, Debug)]
pub enum HookResult {
    /// The hook has nothing to contribute.
    NoChange,
    /// Accept the result as final for this node; no further looping.
    Done(SimpResult),
    /// Take the result and keep simplifying the node.
    Continue(SimpResult),
}

/// User hooks invoked around every visited term.
///
/// Hooks receive the active relation, the lemma index, the parent term
/// (when visiting a subterm), and the current term. A hook that needs an
/// accumulator keeps it as its own state; the caller gets it back from
/// the hook object after the run.
pub trait Hooks {
    fn pre(
        &mut self,
        _ctx: &mut SimpCtx<'_>,
        _slss: &SimpLemmaIndex,
        _rel: &Name,
        _parent: Option<&Expr>,
        _e: &Expr,
    ) -> HookResult {
        HookResult::NoChange
    }

    fn post(
        &mut self,
        _ctx: &mut SimpCtx<'_>,
        _slss: &SimpLemmaIndex,
        _rel: &Name,
        _parent: Option<&Expr>,
        _e: &Expr,
    ) -> HookResult {
        HookResult::NoChange
    }

    /// Discharge a propositional side condition; `None` defers to the
    /// simplifier's default prover.
    fn prove(
        &mut self,
        _ctx: &mut SimpCtx<'_>,
        _slss: &SimpLemmaIndex,
        _rel: &Name,
        _ty: &Expr,
    ) -> Option<Expr> {
        None
    }
}

/// The empty capability set.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl Hooks for NoHooks {}
