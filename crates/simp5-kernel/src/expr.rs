//! Expressions
//!
//! The term language of the simplifier: a dependently-typed lambda calculus
//! with de Bruijn indices for bound variables and unique identifiers for
//! free variables (locally nameless). Children are shared through `Arc`, so
//! cloning an expression is cheap and the simplifier cache can key on whole
//! terms.

use crate::level::Level;
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for a free variable.
///
/// Identifiers with the high bit set are reserved for temporary
/// metavariables (see `simp5-core`); the local-context counter never
/// reaches them.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FVarId(pub u64);

/// Binder annotation.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BinderInfo {
    /// Explicit binder `(x : A)`
    Default,
    /// Implicit binder `{x : A}`
    Implicit,
    /// Strict implicit binder `{{x : A}}`
    StrictImplicit,
    /// Instance-implicit binder `[x : A]`, filled by class resolution
    InstImplicit,
}

impl BinderInfo {
    pub fn is_explicit(self) -> bool {
        matches!(self, BinderInfo::Default)
    }

    pub fn is_inst_implicit(self) -> bool {
        matches!(self, BinderInfo::InstImplicit)
    }
}

/// Expression
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Bound variable (de Bruijn index)
    BVar(u32),
    /// Free variable (local constant or tagged metavariable)
    FVar(FVarId),
    /// Sort at a universe level
    Sort(Level),
    /// Constant with universe level instantiation
    Const(Name, Vec<Level>),
    /// Application
    App(Arc<Expr>, Arc<Expr>),
    /// Lambda abstraction
    Lam(BinderInfo, Arc<Expr>, Arc<Expr>),
    /// Dependent function type
    Pi(BinderInfo, Arc<Expr>, Arc<Expr>),
    /// Let binding (type, value, body)
    Let(Arc<Expr>, Arc<Expr>, Arc<Expr>),
    /// Annotation node, transparent to reduction and typing
    MData(Name, Arc<Expr>),
}

impl Expr {
    pub fn bvar(idx: u32) -> Self {
        Expr::BVar(idx)
    }

    pub fn fvar(id: FVarId) -> Self {
        Expr::FVar(id)
    }

    pub fn sort(l: Level) -> Self {
        Expr::Sort(l)
    }

    /// `Prop` (`Sort 0`)
    pub fn prop() -> Self {
        Expr::Sort(Level::zero())
    }

    /// `Type` (`Sort 1`)
    pub fn type_() -> Self {
        Expr::Sort(Level::succ(Level::zero()))
    }

    pub fn const_(name: Name, levels: Vec<Level>) -> Self {
        Expr::Const(name, levels)
    }

    pub fn app(f: Expr, a: Expr) -> Self {
        Expr::App(Arc::new(f), Arc::new(a))
    }

    /// Apply `f` to a spine of arguments.
    pub fn apps(f: Expr, args: impl IntoIterator<Item = Expr>) -> Self {
        args.into_iter().fold(f, Expr::app)
    }

    pub fn lam(bi: BinderInfo, ty: Expr, body: Expr) -> Self {
        Expr::Lam(bi, Arc::new(ty), Arc::new(body))
    }

    pub fn pi(bi: BinderInfo, ty: Expr, body: Expr) -> Self {
        Expr::Pi(bi, Arc::new(ty), Arc::new(body))
    }

    /// Non-dependent function type `a -> b`. The codomain is lifted under
    /// the new binder.
    pub fn arrow(a: Expr, b: Expr) -> Self {
        let lifted = b.lift_loose_bvars(0, 1);
        Expr::pi(BinderInfo::Default, a, lifted)
    }

    pub fn let_(ty: Expr, val: Expr, body: Expr) -> Self {
        Expr::Let(Arc::new(ty), Arc::new(val), Arc::new(body))
    }

    pub fn mdata(tag: Name, e: Expr) -> Self {
        Expr::MData(tag, Arc::new(e))
    }

    pub fn is_app(&self) -> bool {
        matches!(self, Expr::App(..))
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self, Expr::Lam(..))
    }

    pub fn is_pi(&self) -> bool {
        matches!(self, Expr::Pi(..))
    }

    /// A non-dependent `Pi` (the body does not use the binder).
    pub fn is_arrow(&self) -> bool {
        match self {
            Expr::Pi(_, _, body) => !body.has_loose_bvar(0),
            _ => false,
        }
    }

    /// Decompose a non-dependent `Pi` into domain and lowered codomain.
    pub fn unbind_arrow(&self) -> Option<(Expr, Expr)> {
        match self {
            Expr::Pi(_, dom, body) if !body.has_loose_bvar(0) => {
                Some((dom.as_ref().clone(), body.lower_loose_bvars(1)))
            }
            _ => None,
        }
    }

    /// The head of an application spine (`f` in `f a1 ... an`).
    pub fn get_app_fn(&self) -> &Expr {
        let mut e = self;
        while let Expr::App(f, _) = e {
            e = f.as_ref();
        }
        e
    }

    /// The arguments of an application spine, outermost function first.
    pub fn get_app_args(&self) -> Vec<Expr> {
        let mut args = Vec::new();
        let mut e = self;
        while let Expr::App(f, a) = e {
            args.push(a.as_ref().clone());
            e = f.as_ref();
        }
        args.reverse();
        args
    }

    /// Strip annotation nodes.
    pub fn strip_mdata(&self) -> &Expr {
        let mut e = self;
        while let Expr::MData(_, inner) = e {
            e = inner.as_ref();
        }
        e
    }

    /// Substitute `subst` for the outermost bound variable and lower the
    /// remaining loose indices.
    pub fn instantiate(&self, subst: &Expr) -> Expr {
        self.instantiate_at(0, subst)
    }

    fn instantiate_at(&self, depth: u32, subst: &Expr) -> Expr {
        match self {
            Expr::BVar(i) => {
                if *i == depth {
                    subst.lift_loose_bvars(0, depth)
                } else if *i > depth {
                    Expr::BVar(i - 1)
                } else {
                    self.clone()
                }
            }
            Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.instantiate_at(depth, subst),
                a.instantiate_at(depth, subst),
            ),
            Expr::Lam(bi, ty, body) => Expr::lam(
                *bi,
                ty.instantiate_at(depth, subst),
                body.instantiate_at(depth + 1, subst),
            ),
            Expr::Pi(bi, ty, body) => Expr::pi(
                *bi,
                ty.instantiate_at(depth, subst),
                body.instantiate_at(depth + 1, subst),
            ),
            Expr::Let(ty, val, body) => Expr::let_(
                ty.instantiate_at(depth, subst),
                val.instantiate_at(depth, subst),
                body.instantiate_at(depth + 1, subst),
            ),
            Expr::MData(tag, inner) => {
                Expr::mdata(tag.clone(), inner.instantiate_at(depth, subst))
            }
        }
    }

    /// Replace occurrences of a free variable by the outermost bound
    /// variable, preparing the expression for re-binding.
    pub fn abstract_fvar(&self, id: FVarId) -> Expr {
        self.abstract_fvar_at(id, 0)
    }

    fn abstract_fvar_at(&self, id: FVarId, depth: u32) -> Expr {
        match self {
            Expr::FVar(i) => {
                if *i == id {
                    Expr::BVar(depth)
                } else {
                    self.clone()
                }
            }
            Expr::BVar(i) => {
                if *i >= depth {
                    Expr::BVar(i + 1)
                } else {
                    self.clone()
                }
            }
            Expr::Sort(_) | Expr::Const(..) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.abstract_fvar_at(id, depth),
                a.abstract_fvar_at(id, depth),
            ),
            Expr::Lam(bi, ty, body) => Expr::lam(
                *bi,
                ty.abstract_fvar_at(id, depth),
                body.abstract_fvar_at(id, depth + 1),
            ),
            Expr::Pi(bi, ty, body) => Expr::pi(
                *bi,
                ty.abstract_fvar_at(id, depth),
                body.abstract_fvar_at(id, depth + 1),
            ),
            Expr::Let(ty, val, body) => Expr::let_(
                ty.abstract_fvar_at(id, depth),
                val.abstract_fvar_at(id, depth),
                body.abstract_fvar_at(id, depth + 1),
            ),
            Expr::MData(tag, inner) => {
                Expr::mdata(tag.clone(), inner.abstract_fvar_at(id, depth))
            }
        }
    }

    /// Lift loose bound variables at or above `cutoff` by `amount`.
    pub fn lift_loose_bvars(&self, cutoff: u32, amount: u32) -> Expr {
        if amount == 0 {
            return self.clone();
        }
        match self {
            Expr::BVar(i) => {
                if *i >= cutoff {
                    Expr::BVar(i + amount)
                } else {
                    self.clone()
                }
            }
            Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.lift_loose_bvars(cutoff, amount),
                a.lift_loose_bvars(cutoff, amount),
            ),
            Expr::Lam(bi, ty, body) => Expr::lam(
                *bi,
                ty.lift_loose_bvars(cutoff, amount),
                body.lift_loose_bvars(cutoff + 1, amount),
            ),
            Expr::Pi(bi, ty, body) => Expr::pi(
                *bi,
                ty.lift_loose_bvars(cutoff, amount),
                body.lift_loose_bvars(cutoff + 1, amount),
            ),
            Expr::Let(ty, val, body) => Expr::let_(
                ty.lift_loose_bvars(cutoff, amount),
                val.lift_loose_bvars(cutoff, amount),
                body.lift_loose_bvars(cutoff + 1, amount),
            ),
            Expr::MData(tag, inner) => {
                Expr::mdata(tag.clone(), inner.lift_loose_bvars(cutoff, amount))
            }
        }
    }

    /// Lower loose bound variables by `amount`. The caller guarantees no
    /// loose index below `amount` occurs.
    pub fn lower_loose_bvars(&self, amount: u32) -> Expr {
        self.lower_loose_bvars_at(0, amount)
    }

    fn lower_loose_bvars_at(&self, depth: u32, amount: u32) -> Expr {
        match self {
            Expr::BVar(i) => {
                if *i >= depth + amount {
                    Expr::BVar(i - amount)
                } else {
                    self.clone()
                }
            }
            Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) => self.clone(),
            Expr::App(f, a) => Expr::app(
                f.lower_loose_bvars_at(depth, amount),
                a.lower_loose_bvars_at(depth, amount),
            ),
            Expr::Lam(bi, ty, body) => Expr::lam(
                *bi,
                ty.lower_loose_bvars_at(depth, amount),
                body.lower_loose_bvars_at(depth + 1, amount),
            ),
            Expr::Pi(bi, ty, body) => Expr::pi(
                *bi,
                ty.lower_loose_bvars_at(depth, amount),
                body.lower_loose_bvars_at(depth + 1, amount),
            ),
            Expr::Let(ty, val, body) => Expr::let_(
                ty.lower_loose_bvars_at(depth, amount),
                val.lower_loose_bvars_at(depth, amount),
                body.lower_loose_bvars_at(depth + 1, amount),
            ),
            Expr::MData(tag, inner) => {
                Expr::mdata(tag.clone(), inner.lower_loose_bvars_at(depth, amount))
            }
        }
    }

    /// Check whether the loose bound variable with the given index occurs.
    pub fn has_loose_bvar(&self, idx: u32) -> bool {
        match self {
            Expr::BVar(i) => *i == idx,
            Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) => false,
            Expr::App(f, a) => f.has_loose_bvar(idx) || a.has_loose_bvar(idx),
            Expr::Lam(_, ty, body) | Expr::Pi(_, ty, body) => {
                ty.has_loose_bvar(idx) || body.has_loose_bvar(idx + 1)
            }
            Expr::Let(ty, val, body) => {
                ty.has_loose_bvar(idx)
                    || val.has_loose_bvar(idx)
                    || body.has_loose_bvar(idx + 1)
            }
            Expr::MData(_, inner) => inner.has_loose_bvar(idx),
        }
    }

    /// Check whether any loose bound variable occurs.
    pub fn has_loose_bvars(&self) -> bool {
        self.has_loose_bvars_above(0)
    }

    /// Check whether any loose bound variable with index >= `depth` occurs.
    pub fn has_loose_bvar_ge(&self, depth: u32) -> bool {
        self.has_loose_bvars_above(depth)
    }

    fn has_loose_bvars_above(&self, depth: u32) -> bool {
        match self {
            Expr::BVar(i) => *i >= depth,
            Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) => false,
            Expr::App(f, a) => {
                f.has_loose_bvars_above(depth) || a.has_loose_bvars_above(depth)
            }
            Expr::Lam(_, ty, body) | Expr::Pi(_, ty, body) => {
                ty.has_loose_bvars_above(depth) || body.has_loose_bvars_above(depth + 1)
            }
            Expr::Let(ty, val, body) => {
                ty.has_loose_bvars_above(depth)
                    || val.has_loose_bvars_above(depth)
                    || body.has_loose_bvars_above(depth + 1)
            }
            Expr::MData(_, inner) => inner.has_loose_bvars_above(depth),
        }
    }

    /// Check whether a specific free variable occurs.
    pub fn has_fvar(&self, id: FVarId) -> bool {
        self.find_fvar(&|i| i == id)
    }

    /// Check whether any free variable satisfying the predicate occurs.
    pub fn find_fvar(&self, pred: &impl Fn(FVarId) -> bool) -> bool {
        match self {
            Expr::FVar(i) => pred(*i),
            Expr::BVar(_) | Expr::Sort(_) | Expr::Const(..) => false,
            Expr::App(f, a) => f.find_fvar(pred) || a.find_fvar(pred),
            Expr::Lam(_, ty, body) | Expr::Pi(_, ty, body) => {
                ty.find_fvar(pred) || body.find_fvar(pred)
            }
            Expr::Let(ty, val, body) => {
                ty.find_fvar(pred) || val.find_fvar(pred) || body.find_fvar(pred)
            }
            Expr::MData(_, inner) => inner.find_fvar(pred),
        }
    }

    /// Check whether any level metavariable occurs.
    pub fn has_level_meta(&self) -> bool {
        match self {
            Expr::Sort(l) => l.has_meta(),
            Expr::Const(_, ls) => ls.iter().any(Level::has_meta),
            Expr::BVar(_) | Expr::FVar(_) => false,
            Expr::App(f, a) => f.has_level_meta() || a.has_level_meta(),
            Expr::Lam(_, ty, body) | Expr::Pi(_, ty, body) => {
                ty.has_level_meta() || body.has_level_meta()
            }
            Expr::Let(ty, val, body) => {
                ty.has_level_meta() || val.has_level_meta() || body.has_level_meta()
            }
            Expr::MData(_, inner) => inner.has_level_meta(),
        }
    }

    /// Substitute universe parameters throughout the expression.
    pub fn instantiate_level_params(&self, params: &[Name], levels: &[Level]) -> Expr {
        if params.is_empty() {
            return self.clone();
        }
        match self {
            Expr::BVar(_) | Expr::FVar(_) => self.clone(),
            Expr::Sort(l) => Expr::Sort(l.instantiate_params(params, levels)),
            Expr::Const(n, ls) => Expr::Const(
                n.clone(),
                ls.iter()
                    .map(|l| l.instantiate_params(params, levels))
                    .collect(),
            ),
            Expr::App(f, a) => Expr::app(
                f.instantiate_level_params(params, levels),
                a.instantiate_level_params(params, levels),
            ),
            Expr::Lam(bi, ty, body) => Expr::lam(
                *bi,
                ty.instantiate_level_params(params, levels),
                body.instantiate_level_params(params, levels),
            ),
            Expr::Pi(bi, ty, body) => Expr::pi(
                *bi,
                ty.instantiate_level_params(params, levels),
                body.instantiate_level_params(params, levels),
            ),
            Expr::Let(ty, val, body) => Expr::let_(
                ty.instantiate_level_params(params, levels),
                val.instantiate_level_params(params, levels),
                body.instantiate_level_params(params, levels),
            ),
            Expr::MData(tag, inner) => Expr::mdata(
                tag.clone(),
                inner.instantiate_level_params(params, levels),
            ),
        }
    }
}
