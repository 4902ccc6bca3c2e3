//! Canonical term order
//!
//! A total structural order on expressions, used by the permutation gate:
//! a rewrite flagged as a permutation fires only when the instantiated
//! right-hand side is strictly smaller than the left-hand side, which is
//! what keeps AC-style laws terminating.

use simp5_kernel::Expr;
use std::cmp::Ordering;

/// `a < b` in the canonical order.
pub fn is_lt(a: &Expr, b: &Expr) -> bool {
    expr_cmp(a, b) == Ordering::Less
}

fn kind_rank(e: &Expr) -> u8 {
    match e {
        Expr::BVar(_) => 0,
        Expr::Sort(_) => 1,
        Expr::Const(..) => 2,
        Expr::FVar(_) => 3,
        Expr::App(..) => 4,
        Expr::Lam(..) => 5,
        Expr::Pi(..) => 6,
        Expr::Let(..) => 7,
        Expr::MData(..) => 8,
    }
}

/// Total order: kind rank first, then lexicographic on components.
pub fn expr_cmp(a: &Expr, b: &Expr) -> Ordering {
    match (a, b) {
        (Expr::BVar(i), Expr::BVar(j)) => i.cmp(j),
        (Expr::Sort(l1), Expr::Sort(l2)) => l1.cmp(l2),
        (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => {
            n1.cmp(n2).then_with(|| ls1.cmp(ls2))
        }
        (Expr::FVar(i), Expr::FVar(j)) => i.cmp(j),
        (Expr::App(f1, a1), Expr::App(f2, a2)) => {
            expr_cmp(f1, f2).then_with(|| expr_cmp(a1, a2))
        }
        (Expr::Lam(_, t1, b1), Expr::Lam(_, t2, b2))
        | (Expr::Pi(_, t1, b1), Expr::Pi(_, t2, b2)) => {
            expr_cmp(t1, t2).then_with(|| expr_cmp(b1, b2))
        }
        (Expr::Let(t1, v1, b1), Expr::Let(t2, v2, b2)) => expr_cmp(t1, t2)
            .then_with(|| expr_cmp(v1, v2))
            .then_with(|| expr_cmp(b1, b2)),
        (Expr::MData(n1, e1), Expr::MData(n2, e2)) => {
            n1.cmp(n2).then_with(|| expr_cmp(e1, e2))
        }
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use simp5_kernel::Name;

    fn c(name: &str) -> Expr {
        Expr::const_(Name::from_string(name), vec![])
    }

    #[test]
    fn test_total_and_irreflexive() {
        let a = c("a");
        let b = c("b");
        assert!(is_lt(&a, &b));
        assert!(!is_lt(&b, &a));
        assert!(!is_lt(&a, &a));
    }

    #[test]
    fn test_app_order_is_lexicographic() {
        let add = c("Nat.add");
        let ab = Expr::apps(add.clone(), [c("a"), c("b")]);
        let ba = Expr::apps(add, [c("b"), c("a")]);
        assert!(is_lt(&ab, &ba));
        assert!(!is_lt(&ba, &ab));
    }

    #[test]
    fn test_kind_rank_separates() {
        assert!(is_lt(&Expr::bvar(5), &c("a")));
        assert!(is_lt(&c("a"), &Expr::app(c("f"), c("a"))));
    }

    #[test]
    fn test_transitive_on_sample() {
        let xs = [c("a"), c("b"), Expr::apps(c("f"), [c("a")])];
        for x in &xs {
            for y in &xs {
                for z in &xs {
                    if is_lt(x, y) && is_lt(y, z) {
                        assert!(is_lt(x, z));
                    }
                }
            }
        }
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            Just(c("a")),
            Just(c("b")),
            Just(Expr::bvar(0)),
            Just(Expr::prop()),
        ];
        leaf.prop_recursive(3, 12, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(f, a)| Expr::app(f, a)),
                (inner.clone(), inner).prop_map(|(t, b)| {
                    Expr::lam(simp5_kernel::BinderInfo::Default, t, b)
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_total_order(a in arb_expr(), b in arb_expr()) {
            let lt = is_lt(&a, &b);
            let gt = is_lt(&b, &a);
            prop_assert!(!(lt && gt));
            prop_assert!(lt || gt || expr_cmp(&a, &b) == Ordering::Equal);
        }

        #[test]
        fn prop_irreflexive(a in arb_expr()) {
            prop_assert!(!is_lt(&a, &a));
        }
    }
}
