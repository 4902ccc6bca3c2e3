//! The simplifier's view of the type context
//!
//! `SimpCtx` bundles the borrowed environment and instance table with an
//! owned local context, and exposes the typing operations the simplifier
//! needs (`infer`, `whnf`, `is_def_eq`, `is_prop`) plus a fresh-local
//! factory for binder openings.
//!
//! Terms handed to the kernel checker are always metavariable-free: the
//! caller instantiates through its `MetaCtx` first.

use simp5_kernel::env::Environment;
use simp5_kernel::tc::{LocalContext, LocalDecl, TypeChecker, TypeError};
use simp5_kernel::{BinderInfo, Expr, FVarId, Name};

use crate::instances::InstanceTable;

pub struct SimpCtx<'a> {
    pub env: &'a Environment,
    pub instances: &'a InstanceTable,
    lctx: LocalContext,
}

impl<'a> SimpCtx<'a> {
    pub fn new(env: &'a Environment, instances: &'a InstanceTable) -> Self {
        SimpCtx {
            env,
            instances,
            lctx: LocalContext::new(),
        }
    }

    /// Start from an existing local context (e.g. a goal's hypotheses).
    pub fn with_locals(
        env: &'a Environment,
        instances: &'a InstanceTable,
        lctx: LocalContext,
    ) -> Self {
        SimpCtx {
            env,
            instances,
            lctx,
        }
    }

    fn checker(&self) -> TypeChecker<'a> {
        TypeChecker::with_context(self.env, self.lctx.clone())
    }

    pub fn infer(&mut self, e: &Expr) -> Result<Expr, TypeError> {
        self.checker().infer_type(e)
    }

    pub fn whnf(&self, e: &Expr) -> Expr {
        self.checker().whnf(e)
    }

    pub fn is_def_eq(&mut self, a: &Expr, b: &Expr) -> bool {
        self.checker().is_def_eq(a, b)
    }

    /// Check whether `e` is a proposition (its type is `Prop`).
    pub fn is_prop(&mut self, e: &Expr) -> bool {
        self.checker().is_prop(e)
    }

    /// Push a fresh local and return it as an expression.
    pub fn push_local(&mut self, name: Name, ty: Expr, bi: BinderInfo) -> Expr {
        Expr::fvar(self.lctx.push(name, ty, bi))
    }

    pub fn local_decl(&self, id: FVarId) -> Option<&LocalDecl> {
        self.lctx.get(id)
    }

    /// Current depth of the local context; pass back to `truncate_locals`
    /// to drop everything pushed after this point.
    pub fn locals_mark(&self) -> usize {
        self.lctx.len()
    }

    pub fn truncate_locals(&mut self, mark: usize) {
        self.lctx.truncate(mark);
    }

    pub fn locals(&self) -> &LocalContext {
        &self.lctx
    }

    /// Re-abstract a body over the given locals as nested lambdas
    /// (innermost local last).
    pub fn mk_lambda(&self, locals: &[FVarId], body: Expr) -> Expr {
        self.mk_binding(true, locals, body)
    }

    /// Re-abstract a body over the given locals as nested Pis.
    pub fn mk_pi(&self, locals: &[FVarId], body: Expr) -> Expr {
        self.mk_binding(false, locals, body)
    }

    /// Fold binders from the innermost local outwards. Each outer pass
    /// also rebinds the local inside the domains built so far, so
    /// dependent local types come out correct.
    fn mk_binding(&self, lam: bool, locals: &[FVarId], body: Expr) -> Expr {
        let mut e = body;
        for id in locals.iter().rev() {
            let decl = self
                .lctx
                .get(*id)
                .expect("mk_binding: local not in context");
            let ty = decl.ty.clone();
            e = e.abstract_fvar(*id);
            e = if lam {
                Expr::lam(decl.bi, ty, e)
            } else {
                Expr::pi(decl.bi, ty, e)
            };
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(name: &str) -> Expr {
        Expr::const_(Name::from_string(name), vec![])
    }

    fn setup() -> (Environment, InstanceTable) {
        let mut env = Environment::new();
        env.init_core().unwrap();
        env.add_axiom(Name::from_string("Nat"), vec![], Expr::type_())
            .unwrap();
        env.add_axiom(Name::from_string("P"), vec![], Expr::prop())
            .unwrap();
        (env, InstanceTable::new())
    }

    #[test]
    fn test_push_and_infer_local() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let x = ctx.push_local(Name::from_string("x"), c("Nat"), BinderInfo::Default);
        let ty = ctx.infer(&x).unwrap();
        assert_eq!(ty, c("Nat"));
    }

    #[test]
    fn test_mk_lambda_reabstracts() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let x = ctx.push_local(Name::from_string("x"), c("Nat"), BinderInfo::Default);
        let Expr::FVar(xid) = x else { unreachable!() };
        let lam = ctx.mk_lambda(&[xid], x.clone());
        assert_eq!(
            lam,
            Expr::lam(BinderInfo::Default, c("Nat"), Expr::bvar(0))
        );
        // types check: \x : Nat. x  :  Nat -> Nat
        let ty = ctx.infer(&lam).unwrap();
        assert!(ctx.is_def_eq(&ty, &Expr::arrow(c("Nat"), c("Nat"))));
    }

    #[test]
    fn test_mk_lambda_dependent_types() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        // x : Nat, h : Eq Nat x x; abstracting over both must rebind x
        // inside h's type.
        let one = simp5_kernel::Level::succ(simp5_kernel::Level::zero());
        let x = ctx.push_local(Name::from_string("x"), c("Nat"), BinderInfo::Default);
        let eq_x_x = Expr::apps(
            Expr::const_(Name::from_string("Eq"), vec![one]),
            [c("Nat"), x.clone(), x.clone()],
        );
        let h = ctx.push_local(Name::from_string("h"), eq_x_x, BinderInfo::Default);
        let Expr::FVar(xid) = x else { unreachable!() };
        let Expr::FVar(hid) = h else { unreachable!() };
        let pi = ctx.mk_pi(&[xid, hid], Expr::prop());
        assert!(!pi.find_fvar(&|id| id == xid || id == hid));
        assert!(ctx.infer(&pi).is_ok());
    }

    #[test]
    fn test_truncate_locals() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mark = ctx.locals_mark();
        ctx.push_local(Name::from_string("x"), c("Nat"), BinderInfo::Default);
        assert_eq!(ctx.locals_mark(), mark + 1);
        ctx.truncate_locals(mark);
        assert_eq!(ctx.locals_mark(), mark);
    }
}
