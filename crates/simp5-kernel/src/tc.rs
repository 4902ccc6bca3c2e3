//! Type checker
//!
//! Type inference, weak-head normalization and definitional equality.
//! The simplifier's soundness story bottoms out here: every proof object it
//! returns must infer to `rel lhs rhs`.

use crate::env::Environment;
use crate::expr::{BinderInfo, Expr, FVarId};
use crate::level::Level;
use crate::name::Name;

/// Minimum stack space to reserve before recursive calls (32 KB).
const MIN_STACK_RED_ZONE: usize = 32 * 1024;

/// Stack size to grow to when running low (1 MB).
const STACK_GROWTH_SIZE: usize = 1024 * 1024;

/// Local context entry
#[derive(Clone, Debug)]
pub struct LocalDecl {
    /// Unique identifier
    pub id: FVarId,
    /// User-facing name
    pub name: Name,
    /// Type of the variable
    pub ty: Expr,
    /// Value (for let bindings)
    pub value: Option<Expr>,
    /// Binder info
    pub bi: BinderInfo,
}

/// Local context (stack of local declarations)
#[derive(Clone, Debug, Default)]
pub struct LocalContext {
    decls: Vec<LocalDecl>,
    next_id: u64,
}

impl LocalContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new variable binding
    pub fn push(&mut self, name: Name, ty: Expr, bi: BinderInfo) -> FVarId {
        let id = FVarId(self.next_id);
        self.next_id += 1;
        self.decls.push(LocalDecl {
            id,
            name,
            ty,
            value: None,
            bi,
        });
        id
    }

    /// Push a let binding
    pub fn push_let(&mut self, name: Name, ty: Expr, value: Expr) -> FVarId {
        let id = FVarId(self.next_id);
        self.next_id += 1;
        self.decls.push(LocalDecl {
            id,
            name,
            ty,
            value: Some(value),
            bi: BinderInfo::Default,
        });
        id
    }

    /// Pop the most recent binding
    pub fn pop(&mut self) -> Option<LocalDecl> {
        self.decls.pop()
    }

    /// Look up a free variable
    pub fn get(&self, id: FVarId) -> Option<&LocalDecl> {
        self.decls.iter().rev().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    /// Drop all bindings above the given mark.
    pub fn truncate(&mut self, len: usize) {
        self.decls.truncate(len);
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocalDecl> {
        self.decls.iter()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    #[error("unbound variable index: {0}")]
    UnboundVariable(u32),
    #[error("unknown free variable: {0:?}")]
    UnknownFVar(FVarId),
    #[error("unknown constant: {0}")]
    UnknownConst(Name),
    #[error("universe level arity mismatch for: {0}")]
    LevelArity(Name),
    #[error("expected function type, got: {0:?}")]
    NotAFunction(Box<Expr>),
    #[error("type mismatch: expected {expected:?}, got {inferred:?}")]
    TypeMismatch {
        expected: Box<Expr>,
        inferred: Box<Expr>,
    },
    #[error("expected sort, got: {0:?}")]
    ExpectedSort(Box<Expr>),
}

/// Type checker
pub struct TypeChecker<'env> {
    env: &'env Environment,
    ctx: LocalContext,
}

impl<'env> TypeChecker<'env> {
    pub fn new(env: &'env Environment) -> Self {
        Self {
            env,
            ctx: LocalContext::new(),
        }
    }

    /// Create a type checker over an existing local context
    pub fn with_context(env: &'env Environment, ctx: LocalContext) -> Self {
        Self { env, ctx }
    }

    pub fn local_context(&self) -> &LocalContext {
        &self.ctx
    }

    pub fn local_context_mut(&mut self) -> &mut LocalContext {
        &mut self.ctx
    }

    /// Infer the type of an expression.
    pub fn infer_type(&mut self, e: &Expr) -> Result<Expr, TypeError> {
        stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || {
            self.infer_type_impl(e)
        })
    }

    fn infer_type_impl(&mut self, e: &Expr) -> Result<Expr, TypeError> {
        match e {
            Expr::BVar(idx) => Err(TypeError::UnboundVariable(*idx)),
            Expr::FVar(id) => {
                let decl = self.ctx.get(*id).ok_or(TypeError::UnknownFVar(*id))?;
                Ok(decl.ty.clone())
            }
            Expr::Sort(l) => Ok(Expr::Sort(Level::succ(l.clone()))),
            Expr::Const(name, levels) => {
                let info = self
                    .env
                    .get_const(name)
                    .ok_or_else(|| TypeError::UnknownConst(name.clone()))?;
                if info.level_params.len() != levels.len() {
                    return Err(TypeError::LevelArity(name.clone()));
                }
                Ok(info.ty.instantiate_level_params(&info.level_params, levels))
            }
            Expr::App(f, a) => {
                let f_ty = self.infer_type(f)?;
                let f_ty_whnf = self.whnf(&f_ty);
                match &f_ty_whnf {
                    Expr::Pi(_, expected, result) => {
                        let arg_ty = self.infer_type(a)?;
                        if !self.is_def_eq(&arg_ty, expected) {
                            return Err(TypeError::TypeMismatch {
                                expected: Box::new(expected.as_ref().clone()),
                                inferred: Box::new(arg_ty),
                            });
                        }
                        Ok(result.instantiate(a))
                    }
                    _ => Err(TypeError::NotAFunction(Box::new(f_ty))),
                }
            }
            Expr::Lam(bi, arg_ty, body) => {
                self.ensure_sort(arg_ty)?;
                let id = self.ctx.push(Name::anon(), arg_ty.as_ref().clone(), *bi);
                let opened = body.instantiate(&Expr::fvar(id));
                let body_ty = self.infer_type(&opened);
                self.ctx.pop();
                let body_ty = body_ty?;
                Ok(Expr::Pi(
                    *bi,
                    arg_ty.clone(),
                    body_ty.abstract_fvar(id).into(),
                ))
            }
            Expr::Pi(bi, arg_ty, body) => {
                let l1 = self.ensure_sort(arg_ty)?;
                let id = self.ctx.push(Name::anon(), arg_ty.as_ref().clone(), *bi);
                let opened = body.instantiate(&Expr::fvar(id));
                let body_sort = self.infer_type(&opened);
                self.ctx.pop();
                let body_sort_whnf = self.whnf(&body_sort?);
                let Expr::Sort(l2) = body_sort_whnf else {
                    return Err(TypeError::ExpectedSort(Box::new(body_sort_whnf)));
                };
                Ok(Expr::Sort(Level::imax(l1, l2)))
            }
            Expr::Let(ty, val, body) => {
                self.ensure_sort(ty)?;
                let val_ty = self.infer_type(val)?;
                if !self.is_def_eq(&val_ty, ty) {
                    return Err(TypeError::TypeMismatch {
                        expected: Box::new(ty.as_ref().clone()),
                        inferred: Box::new(val_ty),
                    });
                }
                let id =
                    self.ctx
                        .push_let(Name::anon(), ty.as_ref().clone(), val.as_ref().clone());
                let opened = body.instantiate(&Expr::fvar(id));
                let body_ty = self.infer_type(&opened);
                self.ctx.pop();
                Ok(body_ty?.abstract_fvar(id).instantiate(val))
            }
            Expr::MData(_, inner) => self.infer_type(inner),
        }
    }

    fn ensure_sort(&mut self, ty: &Expr) -> Result<Level, TypeError> {
        let sort = self.infer_type(ty)?;
        match self.whnf(&sort) {
            Expr::Sort(l) => Ok(l),
            other => Err(TypeError::ExpectedSort(Box::new(other))),
        }
    }

    /// Compute weak-head normal form.
    ///
    /// Reduces beta redexes, zeta redexes, delta-unfoldable head constants,
    /// let-bound free variables, and strips annotation nodes.
    pub fn whnf(&self, e: &Expr) -> Expr {
        stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || self.whnf_core(e))
    }

    fn whnf_core(&self, e: &Expr) -> Expr {
        match e {
            Expr::App(f, a) => {
                let f_whnf = self.whnf(f);
                if let Expr::Lam(_, _, body) = &f_whnf {
                    self.whnf(&body.instantiate(a))
                } else if f_whnf == **f {
                    e.clone()
                } else {
                    Expr::App(f_whnf.into(), a.clone())
                }
            }
            Expr::Let(_, val, body) => self.whnf(&body.instantiate(val)),
            Expr::Const(name, levels) => self
                .env
                .unfold(name, levels)
                .map_or_else(|| e.clone(), |val| self.whnf(&val)),
            Expr::FVar(id) => {
                if let Some(decl) = self.ctx.get(*id) {
                    if let Some(val) = &decl.value {
                        return self.whnf(val);
                    }
                }
                e.clone()
            }
            Expr::MData(_, inner) => self.whnf(inner),
            _ => e.clone(),
        }
    }

    /// Check definitional equality.
    ///
    /// Structural comparison after WHNF, with universe-level normalization,
    /// eta for functions, and proof irrelevance (any two proofs of the same
    /// proposition are equal).
    pub fn is_def_eq(&mut self, a: &Expr, b: &Expr) -> bool {
        stacker::maybe_grow(MIN_STACK_RED_ZONE, STACK_GROWTH_SIZE, || {
            self.is_def_eq_impl(a, b)
        })
    }

    fn is_def_eq_impl(&mut self, a: &Expr, b: &Expr) -> bool {
        if a == b {
            return true;
        }

        let a_whnf = self.whnf(a);
        let b_whnf = self.whnf(b);

        if self.try_proof_irrel_eq(&a_whnf, &b_whnf) {
            return true;
        }

        match (&a_whnf, &b_whnf) {
            (Expr::BVar(i), Expr::BVar(j)) => i == j,
            (Expr::FVar(i), Expr::FVar(j)) => i == j,
            (Expr::Sort(l1), Expr::Sort(l2)) => Level::is_def_eq(l1, l2),
            (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => {
                n1 == n2
                    && ls1.len() == ls2.len()
                    && ls1
                        .iter()
                        .zip(ls2.iter())
                        .all(|(l1, l2)| Level::is_def_eq(l1, l2))
            }
            (Expr::App(f1, a1), Expr::App(f2, a2)) => {
                self.is_def_eq(f1, f2) && self.is_def_eq(a1, a2)
            }
            (Expr::Lam(_, t1, b1), Expr::Lam(_, t2, b2))
            | (Expr::Pi(_, t1, b1), Expr::Pi(_, t2, b2)) => {
                self.is_def_eq(t1, t2) && self.is_def_eq_under(t1, b1, b2)
            }
            (Expr::Lam(bi, ty, body), _) => self.try_eta(*bi, ty, body, &b_whnf),
            (_, Expr::Lam(bi, ty, body)) => self.try_eta(*bi, ty, body, &a_whnf),
            _ => false,
        }
    }

    /// Compare two binder bodies by opening them with a shared fresh local.
    fn is_def_eq_under(&mut self, dom: &Expr, b1: &Expr, b2: &Expr) -> bool {
        let id = self.ctx.push(Name::anon(), dom.clone(), BinderInfo::Default);
        let x = Expr::fvar(id);
        let r = self.is_def_eq(&b1.instantiate(&x), &b2.instantiate(&x));
        self.ctx.pop();
        r
    }

    /// Eta: `(\x. f x) =?= g` reduces to `f =?= g` when `x` is not free in `f`.
    fn try_eta(&mut self, _bi: BinderInfo, _ty: &Expr, body: &Expr, other: &Expr) -> bool {
        if let Expr::App(f, arg) = body {
            if matches!(arg.as_ref(), Expr::BVar(0)) && !f.has_loose_bvar(0) {
                let f = f.lower_loose_bvars(1);
                return self.is_def_eq(&f, other);
            }
        }
        false
    }

    /// Proof irrelevance: if both sides are proofs of definitionally equal
    /// propositions, they are equal.
    fn try_proof_irrel_eq(&mut self, a: &Expr, b: &Expr) -> bool {
        let Ok(ta) = self.infer_type(a) else {
            return false;
        };
        if !self.is_prop_type(&ta) {
            return false;
        }
        let Ok(tb) = self.infer_type(b) else {
            return false;
        };
        self.is_def_eq(&ta, &tb)
    }

    /// Check whether a type lives in `Prop`.
    fn is_prop_type(&mut self, ty: &Expr) -> bool {
        match self.infer_type(ty) {
            Ok(sort) => matches!(self.whnf(&sort), Expr::Sort(l) if l.is_zero()),
            Err(_) => false,
        }
    }

    /// Check whether `e` is a proposition (its type is `Prop`).
    pub fn is_prop(&mut self, e: &Expr) -> bool {
        match self.infer_type(e) {
            Ok(ty) => matches!(self.whnf(&ty), Expr::Sort(l) if l.is_zero()),
            Err(_) => false,
        }
    }
}
