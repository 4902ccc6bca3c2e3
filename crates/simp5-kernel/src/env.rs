//! Environment
//!
//! Constant declarations, delta-unfolding, and the two registries the
//! simplifier consults: the simp-relation registry (which binary relations
//! admit rewriting, and the lemmas that witness their reflexivity,
//! transitivity and modus-ponens-reverse) and the subsingleton-class
//! registry used for cast elision.

use crate::expr::Expr;
use crate::level::Level;
use crate::name::Name;
use std::collections::{HashMap, HashSet};

/// A declared constant.
#[derive(Clone, Debug)]
pub struct ConstantInfo {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Expr,
    /// Definitions carry a value and are delta-unfoldable; axioms do not.
    pub value: Option<Expr>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error("constant '{0}' already declared")]
    Duplicate(Name),
    #[error("unknown constant: {0}")]
    Unknown(Name),
}

/// A binary relation the simplifier may rewrite under.
///
/// A relation is *reflexive* iff it registers a `refl` lemma. The optional
/// `from_eq` lemma (`Eq a b -> R a b`) enables lifting equality results into
/// the relation; without it, lifting is unavailable.
#[derive(Clone, Debug)]
pub struct RelationInfo {
    pub name: Name,
    pub refl: Option<Name>,
    pub trans: Option<Name>,
    pub mpr: Option<Name>,
    pub from_eq: Option<Name>,
}

/// Environment of declarations.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    consts: HashMap<Name, ConstantInfo>,
    relations: HashMap<Name, RelationInfo>,
    subsingleton_classes: HashSet<Name>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an axiom (no unfoldable value).
    pub fn add_axiom(
        &mut self,
        name: Name,
        level_params: Vec<Name>,
        ty: Expr,
    ) -> Result<(), EnvError> {
        self.add(ConstantInfo {
            name,
            level_params,
            ty,
            value: None,
        })
    }

    /// Declare a definition with an unfoldable value.
    pub fn add_definition(
        &mut self,
        name: Name,
        level_params: Vec<Name>,
        ty: Expr,
        value: Expr,
    ) -> Result<(), EnvError> {
        self.add(ConstantInfo {
            name,
            level_params,
            ty,
            value: Some(value),
        })
    }

    fn add(&mut self, info: ConstantInfo) -> Result<(), EnvError> {
        if self.consts.contains_key(&info.name) {
            return Err(EnvError::Duplicate(info.name));
        }
        self.consts.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn get_const(&self, name: &Name) -> Option<&ConstantInfo> {
        self.consts.get(name)
    }

    /// Iterate over all declared constants.
    pub fn constants(&self) -> impl Iterator<Item = &ConstantInfo> {
        self.consts.values()
    }

    /// The type of a constant at the given universe instantiation.
    pub fn instantiate_type(&self, name: &Name, levels: &[Level]) -> Option<Expr> {
        let info = self.consts.get(name)?;
        if info.level_params.len() != levels.len() {
            return None;
        }
        Some(info.ty.instantiate_level_params(&info.level_params, levels))
    }

    /// The value of a definition at the given universe instantiation.
    pub fn unfold(&self, name: &Name, levels: &[Level]) -> Option<Expr> {
        let info = self.consts.get(name)?;
        let value = info.value.as_ref()?;
        if info.level_params.len() != levels.len() {
            return None;
        }
        Some(value.instantiate_level_params(&info.level_params, levels))
    }

    pub fn register_relation(&mut self, info: RelationInfo) {
        self.relations.insert(info.name.clone(), info);
    }

    pub fn relation(&self, name: &Name) -> Option<&RelationInfo> {
        self.relations.get(name)
    }

    pub fn is_relation(&self, name: &Name) -> bool {
        self.relations.contains_key(name)
    }

    /// A relation is reflexive iff it registered a reflexivity lemma.
    pub fn is_refl_relation(&self, name: &Name) -> bool {
        self.relations
            .get(name)
            .is_some_and(|r| r.refl.is_some())
    }

    pub fn register_subsingleton_class(&mut self, name: Name) {
        self.subsingleton_classes.insert(name);
    }

    pub fn is_subsingleton_class(&self, name: &Name) -> bool {
        self.subsingleton_classes.contains(name)
    }

    /// Install the logical support constants the simplifier's proof builder
    /// emits, and register `Eq` and `Iff` as simp relations.
    pub fn init_core(&mut self) -> Result<(), EnvError> {
        use crate::expr::BinderInfo::{Default as Expl, Implicit as Impl};

        let n = Name::from_string;
        let v = Expr::bvar;
        let prop = Expr::prop;
        let pu = || Level::param(n("u"));
        let pv = || Level::param(n("v"));
        let u1 = || Level::succ(Level::zero());
        let pi = Expr::pi;
        let app = Expr::app;

        let eq = |lvl: Level, ty: Expr, a: Expr, b: Expr| {
            Expr::apps(Expr::const_(n("Eq"), vec![lvl]), [ty, a, b])
        };
        let iff = |a: Expr, b: Expr| Expr::apps(Expr::const_(n("Iff"), vec![]), [a, b]);
        // Non-dependent function type between two bvar references; the
        // codomain index is written relative to the outside of the arrow.
        let fty = |a_idx: u32, b_idx: u32| pi(Expl, v(a_idx), v(b_idx + 1));
        // `(x : α) -> β x` with `α`, `β` given as outside bvar indices.
        let pity = |a_idx: u32, b_idx: u32| pi(Expl, v(a_idx), app(v(b_idx + 1), v(0)));

        // Prop and its trivial inhabitants
        self.add_axiom(n("True"), vec![], prop())?;
        self.add_axiom(n("True.intro"), vec![], Expr::const_(n("True"), vec![]))?;
        self.add_axiom(n("False"), vec![], prop())?;
        self.add_axiom(n("Not"), vec![], Expr::arrow(prop(), prop()))?;

        // Eq {α : Sort u} : α -> α -> Prop
        self.add_axiom(
            n("Eq"),
            vec![n("u")],
            pi(Impl, Expr::sort(pu()), pi(Expl, v(0), pi(Expl, v(1), prop()))),
        )?;
        // Eq.refl {α} (a : α) : Eq α a a
        self.add_axiom(
            n("Eq.refl"),
            vec![n("u")],
            pi(Impl, Expr::sort(pu()), pi(Expl, v(0), eq(pu(), v(1), v(0), v(0)))),
        )?;
        // Eq.trans {α} {a b c : α} : Eq α a b -> Eq α b c -> Eq α a c
        self.add_axiom(
            n("Eq.trans"),
            vec![n("u")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    v(0),
                    pi(
                        Impl,
                        v(1),
                        pi(
                            Impl,
                            v(2),
                            pi(
                                Expl,
                                eq(pu(), v(3), v(2), v(1)),
                                pi(
                                    Expl,
                                    eq(pu(), v(4), v(2), v(1)),
                                    eq(pu(), v(5), v(4), v(2)),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
        )?;
        // Eq.mpr {a b : Prop} : Eq Prop a b -> b -> a
        self.add_axiom(
            n("Eq.mpr"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(
                    Impl,
                    prop(),
                    pi(Expl, eq(u1(), prop(), v(1), v(0)), pi(Expl, v(1), v(3))),
                ),
            ),
        )?;
        // Eq.rec {α} {a : α} {motive : α -> Sort v} :
        //   motive a -> {b : α} -> Eq α a b -> motive b
        let eq_rec_ty = pi(
            Impl,
            Expr::sort(pu()),
            pi(
                Impl,
                v(0),
                pi(
                    Impl,
                    pi(Expl, v(1), Expr::sort(pv())),
                    pi(
                        Expl,
                        app(v(0), v(1)),
                        pi(
                            Impl,
                            v(3),
                            pi(Expl, eq(pu(), v(4), v(3), v(0)), app(v(3), v(1))),
                        ),
                    ),
                ),
            ),
        );
        self.add_axiom(n("Eq.rec"), vec![n("u"), n("v")], eq_rec_ty.clone())?;
        self.add_axiom(n("Eq.ndrec"), vec![n("u"), n("v")], eq_rec_ty)?;

        // congr {α β} {f₁ f₂ : α -> β} {a₁ a₂ : α} :
        //   Eq (α -> β) f₁ f₂ -> Eq α a₁ a₂ -> Eq β (f₁ a₁) (f₂ a₂)
        self.add_axiom(
            n("congr"),
            vec![n("u"), n("v")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    Expr::sort(pv()),
                    pi(
                        Impl,
                        fty(1, 0),
                        pi(
                            Impl,
                            fty(2, 1),
                            pi(
                                Impl,
                                v(3),
                                pi(
                                    Impl,
                                    v(4),
                                    pi(
                                        Expl,
                                        eq(Level::imax(pu(), pv()), fty(5, 4), v(3), v(2)),
                                        pi(
                                            Expl,
                                            eq(pu(), v(6), v(2), v(1)),
                                            eq(pv(), v(6), app(v(5), v(3)), app(v(4), v(2))),
                                        ),
                                    ),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
        )?;
        // congrFun {α} {β : α -> Sort v} {f g : (x : α) -> β x} :
        //   Eq _ f g -> (a : α) -> Eq (β a) (f a) (g a)
        self.add_axiom(
            n("congrFun"),
            vec![n("u"), n("v")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    pi(Expl, v(0), Expr::sort(pv())),
                    pi(
                        Impl,
                        pity(1, 0),
                        pi(
                            Impl,
                            pity(2, 1),
                            pi(
                                Expl,
                                eq(Level::imax(pu(), pv()), pity(3, 2), v(1), v(0)),
                                pi(
                                    Expl,
                                    v(4),
                                    eq(pv(), app(v(4), v(0)), app(v(3), v(0)), app(v(2), v(0))),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
        )?;
        // congrArg {α β} {a₁ a₂ : α} (f : α -> β) : Eq α a₁ a₂ -> Eq β (f a₁) (f a₂)
        self.add_axiom(
            n("congrArg"),
            vec![n("u"), n("v")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    Expr::sort(pv()),
                    pi(
                        Impl,
                        v(1),
                        pi(
                            Impl,
                            v(2),
                            pi(
                                Expl,
                                fty(3, 2),
                                pi(
                                    Expl,
                                    eq(pu(), v(4), v(2), v(1)),
                                    eq(pv(), v(4), app(v(1), v(3)), app(v(1), v(2))),
                                ),
                            ),
                        ),
                    ),
                ),
            ),
        )?;
        // funext {α} {β : α -> Sort v} {f g : (x : α) -> β x} :
        //   ((x : α) -> Eq (β x) (f x) (g x)) -> Eq _ f g
        self.add_axiom(
            n("funext"),
            vec![n("u"), n("v")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    pi(Expl, v(0), Expr::sort(pv())),
                    pi(
                        Impl,
                        pity(1, 0),
                        pi(
                            Impl,
                            pity(2, 1),
                            pi(
                                Expl,
                                pi(
                                    Expl,
                                    v(3),
                                    eq(pv(), app(v(3), v(0)), app(v(2), v(0)), app(v(1), v(0))),
                                ),
                                eq(Level::imax(pu(), pv()), pity(4, 3), v(1), v(0)),
                            ),
                        ),
                    ),
                ),
            ),
        )?;

        // Iff : Prop -> Prop -> Prop
        self.add_axiom(n("Iff"), vec![], Expr::arrow(prop(), Expr::arrow(prop(), prop())))?;
        self.add_axiom(
            n("Iff.refl"),
            vec![],
            pi(Expl, prop(), iff(v(0), v(0))),
        )?;
        self.add_axiom(
            n("Iff.trans"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(
                    Impl,
                    prop(),
                    pi(
                        Impl,
                        prop(),
                        pi(
                            Expl,
                            iff(v(2), v(1)),
                            pi(Expl, iff(v(2), v(1)), iff(v(4), v(2))),
                        ),
                    ),
                ),
            ),
        )?;
        self.add_axiom(
            n("Iff.mpr"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(Impl, prop(), pi(Expl, iff(v(1), v(0)), pi(Expl, v(1), v(3)))),
            ),
        )?;
        self.add_axiom(
            n("Iff.of_eq"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(Impl, prop(), pi(Expl, eq(u1(), prop(), v(1), v(0)), iff(v(2), v(1)))),
            ),
        )?;
        self.add_axiom(
            n("propext"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(Impl, prop(), pi(Expl, iff(v(1), v(0)), eq(u1(), prop(), v(2), v(1)))),
            ),
        )?;
        self.add_axiom(
            n("iff_true_intro"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(Expl, v(0), iff(v(1), Expr::const_(n("True"), vec![]))),
            ),
        )?;
        self.add_axiom(
            n("iff_false_intro"),
            vec![],
            pi(
                Impl,
                prop(),
                pi(
                    Expl,
                    app(Expr::const_(n("Not"), vec![]), v(0)),
                    iff(v(1), Expr::const_(n("False"), vec![])),
                ),
            ),
        )?;

        // forallCongr {α} {p q : α -> Prop} :
        //   ((a : α) -> Iff (p a) (q a)) -> Iff ((a : α) -> p a) ((a : α) -> q a)
        self.add_axiom(
            n("forallCongr"),
            vec![n("u")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    pi(Expl, v(0), prop()),
                    pi(
                        Impl,
                        pi(Expl, v(1), prop()),
                        pi(
                            Expl,
                            pi(Expl, v(2), iff(app(v(2), v(0)), app(v(1), v(0)))),
                            iff(
                                pi(Expl, v(3), app(v(3), v(0))),
                                pi(Expl, v(3), app(v(2), v(0))),
                            ),
                        ),
                    ),
                ),
            ),
        )?;
        // forallCongrEq: the equality-valued version
        self.add_axiom(
            n("forallCongrEq"),
            vec![n("u")],
            pi(
                Impl,
                Expr::sort(pu()),
                pi(
                    Impl,
                    pi(Expl, v(0), prop()),
                    pi(
                        Impl,
                        pi(Expl, v(1), prop()),
                        pi(
                            Expl,
                            pi(
                                Expl,
                                v(2),
                                eq(u1(), prop(), app(v(2), v(0)), app(v(1), v(0))),
                            ),
                            eq(
                                u1(),
                                prop(),
                                pi(Expl, v(3), app(v(3), v(0))),
                                pi(Expl, v(3), app(v(2), v(0))),
                            ),
                        ),
                    ),
                ),
            ),
        )?;

        // impCongr {a b c d : Prop} : Iff a c -> Iff b d -> Iff (a -> b) (c -> d)
        let imp_hyps = |h1: Expr, h2: Expr, concl: Expr| {
            pi(
                Impl,
                prop(),
                pi(
                    Impl,
                    prop(),
                    pi(
                        Impl,
                        prop(),
                        pi(Impl, prop(), pi(Expl, h1, pi(Expl, h2, concl))),
                    ),
                ),
            )
        };
        self.add_axiom(
            n("impCongr"),
            vec![],
            imp_hyps(
                iff(v(3), v(1)),
                iff(v(3), v(1)),
                iff(Expr::arrow(v(5), v(4)), Expr::arrow(v(3), v(2))),
            ),
        )?;
        self.add_axiom(
            n("impCongrEq"),
            vec![],
            imp_hyps(
                eq(u1(), prop(), v(3), v(1)),
                eq(u1(), prop(), v(3), v(1)),
                eq(
                    u1(),
                    prop(),
                    Expr::arrow(v(5), v(4)),
                    Expr::arrow(v(3), v(2)),
                ),
            ),
        )?;
        self.add_axiom(
            n("impCongrCtx"),
            vec![],
            imp_hyps(
                iff(v(3), v(1)),
                pi(Expl, v(2), iff(v(4), v(2))),
                iff(Expr::arrow(v(5), v(4)), Expr::arrow(v(3), v(2))),
            ),
        )?;
        self.add_axiom(
            n("impCongrCtxEq"),
            vec![],
            imp_hyps(
                eq(u1(), prop(), v(3), v(1)),
                pi(Expl, v(2), eq(u1(), prop(), v(4), v(2))),
                eq(
                    u1(),
                    prop(),
                    Expr::arrow(v(5), v(4)),
                    Expr::arrow(v(3), v(2)),
                ),
            ),
        )?;

        self.register_relation(RelationInfo {
            name: n("Eq"),
            refl: Some(n("Eq.refl")),
            trans: Some(n("Eq.trans")),
            mpr: Some(n("Eq.mpr")),
            from_eq: None,
        });
        self.register_relation(RelationInfo {
            name: n("Iff"),
            refl: Some(n("Iff.refl")),
            trans: Some(n("Iff.trans")),
            mpr: Some(n("Iff.mpr")),
            from_eq: Some(n("Iff.of_eq")),
        });

        Ok(())
    }
}

/// The name of propositional equality.
pub fn eq_name() -> Name {
    Name::from_string("Eq")
}

/// The name of the biconditional.
pub fn iff_name() -> Name {
    Name::from_string("Iff")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinderInfo;

    #[test]
    fn test_add_and_lookup() {
        let mut env = Environment::new();
        env.add_axiom(Name::from_string("A"), vec![], Expr::type_())
            .unwrap();
        assert!(env.get_const(&Name::from_string("A")).is_some());
        assert!(env.get_const(&Name::from_string("B")).is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut env = Environment::new();
        env.add_axiom(Name::from_string("A"), vec![], Expr::type_())
            .unwrap();
        let r = env.add_axiom(Name::from_string("A"), vec![], Expr::type_());
        assert!(matches!(r, Err(EnvError::Duplicate(_))));
    }

    #[test]
    fn test_instantiate_type_levels() {
        let mut env = Environment::new();
        env.init_core().unwrap();
        let ty = env
            .instantiate_type(&Name::from_string("Eq"), &[Level::succ(Level::zero())])
            .unwrap();
        // Eq.{1} : Π {α : Sort 1}, α -> α -> Prop
        match ty {
            Expr::Pi(_, dom, _) => assert_eq!(*dom, Expr::type_()),
            _ => panic!("expected Pi"),
        }
    }

    #[test]
    fn test_level_arity_mismatch() {
        let mut env = Environment::new();
        env.init_core().unwrap();
        assert!(env.instantiate_type(&Name::from_string("Eq"), &[]).is_none());
    }

    #[test]
    fn test_relations_registered() {
        let mut env = Environment::new();
        env.init_core().unwrap();
        assert!(env.is_refl_relation(&eq_name()));
        assert!(env.is_refl_relation(&iff_name()));
        assert!(!env.is_relation(&Name::from_string("Lt")));
        assert_eq!(
            env.relation(&iff_name()).unwrap().from_eq,
            Some(Name::from_string("Iff.of_eq"))
        );
    }

    #[test]
    fn test_unfold_definition() {
        let mut env = Environment::new();
        env.add_axiom(Name::from_string("A"), vec![], Expr::type_())
            .unwrap();
        env.add_definition(
            Name::from_string("id_A"),
            vec![],
            Expr::arrow(
                Expr::const_(Name::from_string("A"), vec![]),
                Expr::const_(Name::from_string("A"), vec![]),
            ),
            Expr::lam(
                BinderInfo::Default,
                Expr::const_(Name::from_string("A"), vec![]),
                Expr::bvar(0),
            ),
        )
        .unwrap();
        assert!(env.unfold(&Name::from_string("id_A"), &[]).is_some());
        assert!(env.unfold(&Name::from_string("A"), &[]).is_none());
    }
}
