//! Proof combinators
//!
//! `mk_app` builds an application of a declared constant from its explicit
//! arguments alone: implicit and universe arguments are recovered by
//! matching declared binder domains against the inferred types of the
//! supplied arguments, and instance-implicit ones by class synthesis. The
//! named wrappers cover the combinators the simplifier emits.

use simp5_kernel::{Expr, Level, Name};

use crate::ctx::SimpCtx;
use crate::instances::synth_instance;
use crate::meta::{has_metavar, match_pattern, meta_fvar, MetaCtx};

#[derive(Debug, thiserror::Error)]
pub enum AppBuilderError {
    #[error("unknown constant: {0}")]
    UnknownConst(Name),
    #[error("too many explicit arguments for: {0}")]
    ArityMismatch(Name),
    #[error("failed to infer the type of an argument of: {0}")]
    CannotInfer(Name),
    #[error("failed to solve the implicit arguments of: {0}")]
    Unsolved(Name),
    #[error("relation '{0}' is not registered as reflexive")]
    NotReflexive(Name),
    #[error("relation '{0}' has no transitivity lemma")]
    NotTransitive(Name),
}

/// Build `name a1 ... an` from the explicit arguments, synthesizing the
/// implicit, instance and universe arguments.
pub fn mk_app(
    ctx: &mut SimpCtx<'_>,
    name: &Name,
    args: &[Expr],
) -> Result<Expr, AppBuilderError> {
    let info = ctx
        .env
        .get_const(name)
        .ok_or_else(|| AppBuilderError::UnknownConst(name.clone()))?
        .clone();

    let num_umeta = info.level_params.len() as u32;
    let umetas: Vec<Level> = (0..num_umeta).map(Level::meta).collect();
    let mut ty = info.ty.instantiate_level_params(&info.level_params, &umetas);

    let mut metas = MetaCtx::new(num_umeta);
    let mut positions = Vec::new();
    let mut next_arg = 0usize;

    while next_arg < args.len() {
        let Expr::Pi(bi, dom, body) = ty else {
            return Err(AppBuilderError::ArityMismatch(name.clone()));
        };
        let i = metas.push_emeta(dom.as_ref().clone(), bi.is_inst_implicit());
        positions.push(i);
        if bi.is_explicit() {
            let arg = &args[next_arg];
            next_arg += 1;
            let declared = metas.instantiate(&dom);
            let arg_ty = ctx
                .infer(arg)
                .map_err(|_| AppBuilderError::CannotInfer(name.clone()))?;
            if !match_pattern(ctx, &mut metas, &declared, &arg_ty) {
                return Err(AppBuilderError::Unsolved(name.clone()));
            }
            metas.assign(i, arg.clone());
        }
        ty = body.instantiate(&meta_fvar(i));
    }

    // Alternate refinement passes: infer the types of assigned values to
    // pin down universe and type metas, then synthesize instances whose
    // types became ground.
    for _ in 0..3 {
        for &i in &positions {
            if !metas.is_eassigned(i) {
                continue;
            }
            let declared = metas.instantiate(&metas.etype(i));
            if !has_metavar(&declared) {
                continue;
            }
            let val = metas.instantiate(&meta_fvar(i));
            if has_metavar(&val) {
                continue;
            }
            if let Ok(val_ty) = ctx.infer(&val) {
                let _ = match_pattern(ctx, &mut metas, &declared, &val_ty);
            }
        }
        for &i in &positions {
            if metas.is_eassigned(i) || !metas.is_instance(i) {
                continue;
            }
            let target = metas.instantiate(&metas.etype(i));
            if has_metavar(&target) {
                continue;
            }
            if let Some(v) = synth_instance(ctx, &target) {
                metas.assign(i, v);
            }
        }
    }

    let mut levels = Vec::with_capacity(num_umeta as usize);
    for j in 0..num_umeta {
        levels.push(
            metas
                .get_univ(j)
                .cloned()
                .ok_or_else(|| AppBuilderError::Unsolved(name.clone()))?,
        );
    }

    let mut e = Expr::const_(name.clone(), levels);
    for &i in &positions {
        let v = metas.instantiate(&meta_fvar(i));
        e = Expr::app(e, v);
    }
    if has_metavar(&e) {
        return Err(AppBuilderError::Unsolved(name.clone()));
    }
    Ok(e)
}

/// `congr h1 h2 : f1 a1 = f2 a2` from `h1 : f1 = f2` and `h2 : a1 = a2`.
pub fn mk_congr(
    ctx: &mut SimpCtx<'_>,
    h1: Expr,
    h2: Expr,
) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, &Name::from_string("congr"), &[h1, h2])
}

/// `congrFun h a : f a = g a` from `h : f = g`.
pub fn mk_congr_fun(
    ctx: &mut SimpCtx<'_>,
    h: Expr,
    a: Expr,
) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, &Name::from_string("congrFun"), &[h, a])
}

/// `congrArg f h : f a1 = f a2` from `h : a1 = a2`.
pub fn mk_congr_arg(
    ctx: &mut SimpCtx<'_>,
    f: Expr,
    h: Expr,
) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, &Name::from_string("congrArg"), &[f, h])
}

/// `funext h : f = g` from `h : forall x, f x = g x`.
pub fn mk_funext(ctx: &mut SimpCtx<'_>, h: Expr) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, &Name::from_string("funext"), &[h])
}

/// `propext h : a = b` from `h : a <-> b`.
pub fn mk_propext(ctx: &mut SimpCtx<'_>, h: Expr) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, &Name::from_string("propext"), &[h])
}

/// Reflexivity proof `rel e e` through the relation's registered lemma.
pub fn mk_refl(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    e: &Expr,
) -> Result<Expr, AppBuilderError> {
    let refl = ctx
        .env
        .relation(rel)
        .and_then(|r| r.refl.clone())
        .ok_or_else(|| AppBuilderError::NotReflexive(rel.clone()))?;
    mk_app(ctx, &refl, &[e.clone()])
}

/// Transitivity composition through the relation's registered lemma.
pub fn mk_trans(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    h1: Expr,
    h2: Expr,
) -> Result<Expr, AppBuilderError> {
    let trans = ctx
        .env
        .relation(rel)
        .and_then(|r| r.trans.clone())
        .ok_or_else(|| AppBuilderError::NotTransitive(rel.clone()))?;
    mk_app(ctx, &trans, &[h1, h2])
}

/// Build the statement `rel lhs rhs`.
pub fn mk_rel(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    lhs: &Expr,
    rhs: &Expr,
) -> Result<Expr, AppBuilderError> {
    mk_app(ctx, rel, &[lhs.clone(), rhs.clone()])
}

/// The canonical proof of `True`.
pub fn mk_true_intro() -> Expr {
    Expr::const_(Name::from_string("True.intro"), vec![])
}
