//! Cross-cutting properties of the simplifier: caching, identity
//! handling, budgets, context locality, idempotence, and the
//! script-driven hook variant.

mod support;

use simp5_core::ctx::SimpCtx;
use simp5_core::hooks::{HookResult, Hooks};
use simp5_core::instances::InstanceTable;
use simp5_core::lemmas::SimpLemmaIndex;
use simp5_core::result::SimpResult;
use simp5_core::simplify::{ext_simplify, simplify, SimpConfig, SimpError, Simplifier};
use simp5_kernel::env::{eq_name, iff_name};
use simp5_kernel::tc::LocalContext;
use simp5_kernel::{BinderInfo, Expr, Name};
use support::*;

fn index_with(
    env: &simp5_kernel::Environment,
    inst: &InstanceTable,
    names: &[&str],
) -> SimpLemmaIndex {
    let mut ctx = SimpCtx::new(env, inst);
    let mut slss = SimpLemmaIndex::new();
    for name in names {
        slss.add_decl(&mut ctx, &n(name), 100).unwrap();
    }
    slss
}

#[test]
fn identity_yields_no_proof() {
    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["add_zero"]);
    let ctx = SimpCtx::new(&env, &inst);
    let mut s = Simplifier::new(ctx, slss, SimpConfig::new());
    let r = s.run(eq_name(), &c("a")).unwrap();
    assert_eq!(r.new_term(), &c("a"));
    assert!(!r.has_proof());
}

#[test]
fn idempotence() {
    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["add_zero", "add_comm"]);
    let e = add(add(c("b"), c("Nat.zero")), c("a"));

    let (n1, _) = simplify(&env, &inst, SimpConfig::new(), &slss, &eq_name(), &e).unwrap();
    // the normal form is already normal
    let again = simplify(&env, &inst, SimpConfig::new(), &slss, &eq_name(), &n1);
    assert!(matches!(again, Err(SimpError::NothingToSimplify)));
}

#[test]
fn shared_subterms_rewrite_consistently() {
    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["add_zero"]);
    let sub = add(c("a"), c("Nat.zero"));
    let e = Expr::apps(c("f"), [sub.clone(), sub]);

    let (new, pf) = simplify(&env, &inst, SimpConfig::new(), &slss, &eq_name(), &e).unwrap();
    assert_eq!(new, Expr::apps(c("f"), [c("a"), c("a")]));
    assert_proves(&env, &pf, &eq_nat(e, new));
}

#[test]
fn step_budget_is_a_hard_bound() {
    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["add_zero"]);
    let mut e = c("a");
    for _ in 0..20 {
        e = add(e, c("Nat.zero"));
    }
    let cfg = SimpConfig {
        max_steps: 5,
        ..SimpConfig::new()
    };
    let ctx = SimpCtx::new(&env, &inst);
    let mut s = Simplifier::new(ctx, slss, cfg);
    let r = s.run(eq_name(), &e);
    assert!(matches!(r, Err(SimpError::StepBudgetExceeded)));
    assert!(s.num_steps() <= 6);
}

#[test]
fn context_locality_without_contextual() {
    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["p_true"]);
    let e = Expr::arrow(c("P"), c("Q"));
    let cfg = SimpConfig {
        contextual: false,
        ..SimpConfig::new()
    };

    // Empty local context.
    let ctx1 = SimpCtx::new(&env, &inst);
    let mut s1 = Simplifier::new(ctx1, slss.clone(), cfg.clone());
    let r1 = s1.run(iff_name(), &e).unwrap();

    // A local context that happens to contain a proof of P; without
    // `contextual` it must not influence the result.
    let mut lctx = LocalContext::new();
    lctx.push(n("hp"), c("P"), BinderInfo::Default);
    let ctx2 = SimpCtx::with_locals(&env, &inst, lctx);
    let mut s2 = Simplifier::new(ctx2, slss, cfg);
    let r2 = s2.run(iff_name(), &e).unwrap();

    assert_eq!(r1.new_term(), r2.new_term());
    assert_eq!(r1.has_proof(), r2.has_proof());
}

/// A script-driven hook set: rewrites `a` to `b` through an axiom in post
/// position and counts its invocations in its own accumulator.
struct RenameHooks {
    posts: usize,
}

impl Hooks for RenameHooks {
    fn post(
        &mut self,
        _ctx: &mut SimpCtx<'_>,
        _slss: &SimpLemmaIndex,
        _rel: &Name,
        _parent: Option<&Expr>,
        e: &Expr,
    ) -> HookResult {
        self.posts += 1;
        if e == &c("a") {
            HookResult::Done(SimpResult::mk(c("b"), c("hab")))
        } else {
            HookResult::NoChange
        }
    }
}

#[test]
fn ext_hooks_thread_their_accumulator() {
    let mut env = setup_env();
    env.add_axiom(n("hab"), vec![], eq_nat(c("a"), c("b")))
        .unwrap();
    let inst = InstanceTable::new();
    let slss = SimpLemmaIndex::new();
    let e = Expr::apps(c("f"), [c("a"), c("a")]);

    let mut hooks = RenameHooks { posts: 0 };
    let (new, pf) =
        ext_simplify(&env, &inst, SimpConfig::new(), &slss, &mut hooks, &eq_name(), &e).unwrap();
    assert_eq!(new, Expr::apps(c("f"), [c("b"), c("b")]));
    assert!(hooks.posts > 0);
    assert_proves(&env, &pf, &eq_nat(e, new));
}

#[test]
fn cancellation_mid_run() {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    let env = setup_env();
    let inst = InstanceTable::new();
    let slss = index_with(&env, &inst, &["add_zero"]);
    let flag = Arc::new(AtomicBool::new(true));
    let cfg = SimpConfig {
        cancel: Some(flag),
        ..SimpConfig::new()
    };
    let e = add(c("a"), c("Nat.zero"));
    let r = simplify(&env, &inst, cfg, &slss, &eq_name(), &e);
    assert!(matches!(r, Err(SimpError::Cancelled)));
}
