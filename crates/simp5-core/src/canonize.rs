//! Definitional-equality canonicalization and cast elision
//!
//! The canonizer keeps one representative per definitional-equivalence
//! class, keyed by type: instance and proof arguments replaced by their
//! representative make syntactically different but defeq subterms collapse,
//! which lets the term-keyed cache and the head index see through them.
//!
//! Cast elision strips `Eq.rec`/`Eq.ndrec` applications whose major
//! premise is a reflexivity proof, at argument positions known to be
//! subsingletons.

use simp5_kernel::Expr;
use std::collections::HashMap;

use crate::congr::fun_params;
use crate::ctx::SimpCtx;

/// Canonical-representative table, keyed by (whnf of the) type.
#[derive(Debug, Default)]
pub struct DefeqCanonizer {
    table: HashMap<Expr, Vec<Expr>>,
}

impl DefeqCanonizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical representative of `e`'s definitional-equivalence
    /// class. The first member seen becomes the representative; later
    /// defeq members are replaced by it.
    pub fn canonize(&mut self, ctx: &mut SimpCtx<'_>, e: &Expr) -> Expr {
        let Ok(ty) = ctx.infer(e) else {
            return e.clone();
        };
        let key = ctx.whnf(&ty);
        let entries = self.table.entry(key).or_default();
        if entries.iter().any(|c| c == e) {
            return e.clone();
        }
        for i in 0..entries.len() {
            let cand = entries[i].clone();
            if ctx.is_def_eq(&cand, e) {
                return cand;
            }
        }
        entries.push(e.clone());
        e.clone()
    }
}

fn is_eq_rec_head(e: &Expr) -> bool {
    matches!(
        e.strip_mdata(),
        Expr::Const(n, _) if n.as_str() == "Eq.rec" || n.as_str() == "Eq.ndrec"
    )
}

fn is_refl_head(e: &Expr) -> bool {
    matches!(
        e.strip_mdata().get_app_fn(),
        Expr::Const(n, _) if n.as_str() == "Eq.refl"
    )
}

/// Remove casts of the form `Eq.rec α a motive x a (Eq.refl _ _)` at
/// subsingleton argument positions, replacing the cast by `x`. Iterates
/// until no applicable cast remains at a position.
pub fn remove_unnecessary_casts(ctx: &mut SimpCtx<'_>, e: &Expr) -> Expr {
    let f = e.get_app_fn().clone();
    let mut args = e.get_app_args();
    let Some(infos) = fun_params(ctx, &f, args.len()) else {
        return e.clone();
    };
    let mut modified = false;
    for (i, info) in infos.iter().enumerate() {
        if !info.is_subsingleton {
            continue;
        }
        loop {
            let cast = &args[i];
            if !is_eq_rec_head(cast.get_app_fn()) {
                break;
            }
            let cast_args = cast.get_app_args();
            if cast_args.len() != 6 || !is_refl_head(&cast_args[5]) {
                break;
            }
            args[i] = cast_args[3].clone();
            modified = true;
        }
    }
    if modified {
        Expr::apps(f, args)
    } else {
        e.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instances::InstanceTable;
    use simp5_kernel::{BinderInfo, Environment, Level, Name};

    fn c(name: &str) -> Expr {
        Expr::const_(Name::from_string(name), vec![])
    }

    fn setup() -> (Environment, InstanceTable) {
        let mut env = Environment::new();
        env.init_core().unwrap();
        env.add_axiom(Name::from_string("Nat"), vec![], Expr::type_())
            .unwrap();
        env.add_axiom(Name::from_string("a"), vec![], c("Nat")).unwrap();
        env.add_axiom(
            Name::from_string("P"),
            vec![],
            Expr::arrow(c("Nat"), Expr::prop()),
        )
        .unwrap();
        env.add_axiom(
            Name::from_string("pa"),
            vec![],
            Expr::app(c("P"), c("a")),
        )
        .unwrap();
        env.add_axiom(
            Name::from_string("pa2"),
            vec![],
            Expr::app(c("P"), c("a")),
        )
        .unwrap();
        // g : forall (x : Nat), P x -> Nat
        env.add_axiom(
            Name::from_string("g"),
            vec![],
            Expr::pi(
                BinderInfo::Default,
                c("Nat"),
                Expr::arrow(Expr::app(c("P"), Expr::bvar(0)), c("Nat")),
            ),
        )
        .unwrap();
        (env, InstanceTable::new())
    }

    #[test]
    fn test_first_seen_is_canonical() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut canon = DefeqCanonizer::new();
        // pa and pa2 are proofs of the same Prop, hence defeq; the first
        // one canonized wins.
        assert_eq!(canon.canonize(&mut ctx, &c("pa")), c("pa"));
        assert_eq!(canon.canonize(&mut ctx, &c("pa2")), c("pa"));
        assert_eq!(canon.canonize(&mut ctx, &c("pa")), c("pa"));
    }

    #[test]
    fn test_distinct_classes_untouched() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut canon = DefeqCanonizer::new();
        assert_eq!(canon.canonize(&mut ctx, &c("a")), c("a"));
        assert_eq!(canon.canonize(&mut ctx, &c("pa")), c("pa"));
    }

    #[test]
    fn test_cast_elision() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let one = Level::succ(Level::zero());
        // cast = Eq.rec Nat a P pa a (Eq.refl Nat a) : P a
        let cast = Expr::apps(
            Expr::const_(Name::from_string("Eq.rec"), vec![one.clone(), Level::zero()]),
            [
                c("Nat"),
                c("a"),
                c("P"),
                c("pa"),
                c("a"),
                Expr::apps(
                    Expr::const_(Name::from_string("Eq.refl"), vec![one]),
                    [c("Nat"), c("a")],
                ),
            ],
        );
        let e = Expr::apps(c("g"), [c("a"), cast]);
        let out = remove_unnecessary_casts(&mut ctx, &e);
        assert_eq!(out, Expr::apps(c("g"), [c("a"), c("pa")]));
    }

    #[test]
    fn test_cast_with_nontrivial_major_kept() {
        let (mut env, inst) = setup();
        let one = Level::succ(Level::zero());
        env.add_axiom(
            Name::from_string("haa"),
            vec![],
            Expr::apps(
                Expr::const_(Name::from_string("Eq"), vec![one.clone()]),
                [c("Nat"), c("a"), c("a")],
            ),
        )
        .unwrap();
        let mut ctx = SimpCtx::new(&env, &inst);
        let cast = Expr::apps(
            Expr::const_(Name::from_string("Eq.rec"), vec![one, Level::zero()]),
            [c("Nat"), c("a"), c("P"), c("pa"), c("a"), c("haa")],
        );
        let e = Expr::apps(c("g"), [c("a"), cast.clone()]);
        let out = remove_unnecessary_casts(&mut ctx, &e);
        assert_eq!(out, e);
    }
}
