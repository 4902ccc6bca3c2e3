//! Shared environment for the simplifier integration tests.
#![allow(dead_code)] // each test binary uses a different slice of this

use simp5_core::instances::InstanceTable;
use simp5_kernel::{BinderInfo, Environment, Expr, Level, Name, TypeChecker};

pub fn n(s: &str) -> Name {
    Name::from_string(s)
}

pub fn c(s: &str) -> Expr {
    Expr::const_(n(s), vec![])
}

pub fn one() -> Level {
    Level::succ(Level::zero())
}

pub fn eq_of(level: Level, ty: Expr, l: Expr, r: Expr) -> Expr {
    Expr::apps(Expr::const_(n("Eq"), vec![level]), [ty, l, r])
}

pub fn eq_nat(l: Expr, r: Expr) -> Expr {
    eq_of(one(), c("Nat"), l, r)
}

pub fn eq_prop(l: Expr, r: Expr) -> Expr {
    eq_of(one(), Expr::prop(), l, r)
}

pub fn iff(l: Expr, r: Expr) -> Expr {
    Expr::apps(c("Iff"), [l, r])
}

pub fn add(l: Expr, r: Expr) -> Expr {
    Expr::apps(c("Nat.add"), [l, r])
}

/// An environment with the core logical constants plus the arithmetic and
/// propositional vocabulary the scenarios use.
pub fn setup_env() -> Environment {
    let mut env = Environment::new();
    env.init_core().unwrap();

    env.add_axiom(n("Nat"), vec![], Expr::type_()).unwrap();
    env.add_axiom(n("Nat.zero"), vec![], c("Nat")).unwrap();
    env.add_axiom(n("a"), vec![], c("Nat")).unwrap();
    env.add_axiom(n("b"), vec![], c("Nat")).unwrap();
    env.add_axiom(
        n("Nat.add"),
        vec![],
        Expr::arrow(c("Nat"), Expr::arrow(c("Nat"), c("Nat"))),
    )
    .unwrap();
    env.add_axiom(
        n("f"),
        vec![],
        Expr::arrow(c("Nat"), Expr::arrow(c("Nat"), c("Nat"))),
    )
    .unwrap();
    env.add_axiom(n("q"), vec![], Expr::arrow(c("Nat"), c("Nat")))
        .unwrap();

    // add_zero : forall (x : Nat), x + 0 = x
    env.add_axiom(
        n("add_zero"),
        vec![],
        Expr::pi(
            BinderInfo::Default,
            c("Nat"),
            eq_nat(add(Expr::bvar(0), c("Nat.zero")), Expr::bvar(0)),
        ),
    )
    .unwrap();
    // add_comm : forall (x y : Nat), x + y = y + x
    env.add_axiom(
        n("add_comm"),
        vec![],
        Expr::pi(
            BinderInfo::Default,
            c("Nat"),
            Expr::pi(
                BinderInfo::Default,
                c("Nat"),
                eq_nat(
                    add(Expr::bvar(1), Expr::bvar(0)),
                    add(Expr::bvar(0), Expr::bvar(1)),
                ),
            ),
        ),
    )
    .unwrap();

    env.add_axiom(n("P"), vec![], Expr::prop()).unwrap();
    env.add_axiom(n("Q"), vec![], Expr::prop()).unwrap();
    // p_true : P -> (Q <-> True)
    env.add_axiom(
        n("p_true"),
        vec![],
        Expr::arrow(c("P"), iff(c("Q"), c("True"))),
    )
    .unwrap();
    // q_true_iff : Q <-> True
    env.add_axiom(n("q_true_iff"), vec![], iff(c("Q"), c("True")))
        .unwrap();
    // peq : P = Q (propositional equality, for lifting)
    env.add_axiom(n("peq"), vec![], eq_prop(c("P"), c("Q")))
        .unwrap();

    // Pn : Nat -> Prop with two proofs of Pn a, and a head whose second
    // argument is a proof
    env.add_axiom(n("Pn"), vec![], Expr::arrow(c("Nat"), Expr::prop()))
        .unwrap();
    env.add_axiom(n("pa"), vec![], Expr::app(c("Pn"), c("a")))
        .unwrap();
    env.add_axiom(n("pa2"), vec![], Expr::app(c("Pn"), c("a")))
        .unwrap();
    env.add_axiom(
        n("g"),
        vec![],
        Expr::pi(
            BinderInfo::Default,
            c("Nat"),
            Expr::arrow(Expr::app(c("Pn"), Expr::bvar(0)), c("Nat")),
        ),
    )
    .unwrap();

    // And with its congruence lemma
    env.add_axiom(
        n("And"),
        vec![],
        Expr::arrow(Expr::prop(), Expr::arrow(Expr::prop(), Expr::prop())),
    )
    .unwrap();
    let v = Expr::bvar;
    env.add_axiom(
        n("and_congr"),
        vec![],
        Expr::pi(
            BinderInfo::Implicit,
            Expr::prop(),
            Expr::pi(
                BinderInfo::Implicit,
                Expr::prop(),
                Expr::pi(
                    BinderInfo::Implicit,
                    Expr::prop(),
                    Expr::pi(
                        BinderInfo::Implicit,
                        Expr::prop(),
                        Expr::pi(
                            BinderInfo::Default,
                            iff(v(3), v(1)),
                            Expr::pi(
                                BinderInfo::Default,
                                iff(v(3), v(1)),
                                iff(
                                    Expr::apps(c("And"), [v(5), v(4)]),
                                    Expr::apps(c("And"), [v(3), v(2)]),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
        ),
    )
    .unwrap();

    // A type class with one instance, and a lemma guarded by it:
    // collapse : [inst : Monoid Nat] -> forall (x : Nat), q x = x
    env.add_axiom(n("Monoid"), vec![], Expr::arrow(Expr::type_(), Expr::type_()))
        .unwrap();
    env.add_axiom(
        n("instMonoidNat"),
        vec![],
        Expr::app(c("Monoid"), c("Nat")),
    )
    .unwrap();
    env.add_axiom(
        n("collapse"),
        vec![],
        Expr::pi(
            BinderInfo::InstImplicit,
            Expr::app(c("Monoid"), c("Nat")),
            Expr::pi(
                BinderInfo::Default,
                c("Nat"),
                eq_nat(Expr::app(c("q"), Expr::bvar(0)), Expr::bvar(0)),
            ),
        ),
    )
    .unwrap();

    env
}

/// An instance table knowing `Monoid Nat`.
pub fn setup_instances() -> InstanceTable {
    let mut table = InstanceTable::new();
    table.register_class(n("Monoid"), 1);
    table.add_instance(
        n("instMonoidNat"),
        n("Monoid"),
        Expr::app(c("Monoid"), c("Nat")),
        simp5_core::instances::DEFAULT_PRIORITY,
    );
    table
}

/// Soundness check: the proof must type check with the expected
/// conclusion.
pub fn assert_proves(env: &Environment, pf: &Expr, expected: &Expr) {
    let mut tc = TypeChecker::new(env);
    let ty = tc
        .infer_type(pf)
        .unwrap_or_else(|e| panic!("proof does not type check: {e}\nproof: {pf:?}"));
    assert!(
        tc.is_def_eq(&ty, expected),
        "proof proves {ty:?}\nexpected {expected:?}"
    );
}
