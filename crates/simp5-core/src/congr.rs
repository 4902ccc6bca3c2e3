//! Synthesized congruence lemmas
//!
//! For an application `f a1 ... an` under equality, the simplifier asks
//! for a congruence lemma specialized to `f`'s type: every argument
//! position is classified as Fixed (later positions or the result depend
//! on it), Cast (subsingleton: a proposition or a registered subsingleton
//! instance class), or Eq (freely rewritable). Heterogeneous positions are
//! never produced here.

use simp5_kernel::{BinderInfo, Expr, Name};

use crate::ctx::SimpCtx;
use crate::instances::extract_class_app;

/// Kind of a congruence-lemma parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CongrArgKind {
    /// The argument appears on both sides unchanged.
    Fixed,
    /// Fixed, and the lemma carries no parameter for it.
    FixedNoParam,
    /// The argument is rewritten under equality.
    Eq,
    /// Subsingleton argument, kept and elided afterwards.
    Cast,
    /// Heterogeneous equality; not produced by this synthesizer.
    HEq,
}

/// A congruence lemma specialized to one application.
#[derive(Clone, Debug)]
pub struct CongrSimpLemma {
    pub arg_kinds: Vec<CongrArgKind>,
}

/// Parameter information for an application head.
#[derive(Clone, Debug)]
pub struct ParamInfo {
    pub bi: BinderInfo,
    /// The parameter's type is a proposition.
    pub is_prop: bool,
    /// Proof-irrelevant or canonical-instance position.
    pub is_subsingleton: bool,
    /// Later parameter types or the result type depend on it.
    pub has_fwd_deps: bool,
}

/// Compute parameter information for the first `nargs` parameters of `f`.
/// Returns `None` when `f`'s type does not expose that many Pis.
pub fn fun_params(
    ctx: &mut SimpCtx<'_>,
    f: &Expr,
    nargs: usize,
) -> Option<Vec<ParamInfo>> {
    let f_ty = ctx.infer(f).ok()?;
    let mut it = ctx.whnf(&f_ty);
    let mark = ctx.locals_mark();
    let mut infos = Vec::with_capacity(nargs);
    for _ in 0..nargs {
        let Expr::Pi(bi, dom, body) = &it else {
            ctx.truncate_locals(mark);
            return None;
        };
        let bi = *bi;
        let dom = dom.as_ref().clone();
        let has_fwd_deps = body.has_loose_bvar(0);
        let is_prop = ctx.is_prop(&dom);
        let is_subsingleton = is_prop || (bi.is_inst_implicit() && is_subsingleton_class(ctx, &dom));
        let local = ctx.push_local(Name::anon(), dom, bi);
        let next = body.instantiate(&local);
        infos.push(ParamInfo {
            bi,
            is_prop,
            is_subsingleton,
            has_fwd_deps,
        });
        it = ctx.whnf(&next);
    }
    ctx.truncate_locals(mark);
    Some(infos)
}

fn is_subsingleton_class(ctx: &SimpCtx<'_>, ty: &Expr) -> bool {
    extract_class_app(ty)
        .is_some_and(|(name, _)| ctx.env.is_subsingleton_class(&name))
}

/// Synthesize the congruence lemma specialized to the application `e`.
///
/// Returns `None` when the head type does not expose one parameter per
/// argument; the caller then falls back to generic binary congruence.
pub fn mk_specialized_congr_simp(
    ctx: &mut SimpCtx<'_>,
    e: &Expr,
) -> Option<CongrSimpLemma> {
    debug_assert!(e.is_app());
    let f = e.get_app_fn().clone();
    let nargs = e.get_app_args().len();
    let infos = fun_params(ctx, &f, nargs)?;
    let arg_kinds = infos
        .iter()
        .map(|info| {
            if info.is_subsingleton {
                CongrArgKind::Cast
            } else if info.has_fwd_deps {
                CongrArgKind::Fixed
            } else {
                CongrArgKind::Eq
            }
        })
        .collect();
    Some(CongrSimpLemma { arg_kinds })
}
