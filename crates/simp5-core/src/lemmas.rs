//! Simp lemmas and their index
//!
//! A declared lemma `forall xs, rel lhs rhs` is compiled by opening its
//! binders as indexed expression metavariables (universe parameters become
//! universe metavariables) and decomposing the conclusion through the
//! relation registry. Proofs of bare propositions are converted to
//! `p <-> True` rewrites, and proofs of negations to `p <-> False`.
//!
//! The index is a per-relation multimap from the head pattern of the
//! left-hand side to lemmas, with a parallel congruence-lemma index.
//! Buckets are kept sorted by priority, highest first.

use simp5_kernel::env::Environment;
use simp5_kernel::{Expr, FVarId, Level, Name};
use std::collections::HashMap;
use std::sync::Arc;

use crate::ctx::SimpCtx;
use crate::meta::{as_meta, fvar_meta_idx, has_metavar, meta_fvar};

#[derive(Debug, thiserror::Error)]
pub enum LemmaError {
    #[error("unknown constant: {0}")]
    UnknownConst(Name),
    #[error("'{0}' is neither a relation statement nor a proposition")]
    NotARelation(Name),
    #[error("congruence hypothesis of '{0}' does not end in a metavariable spine")]
    BadCongrHyp(Name),
}

/// Decompose `rel lhs rhs` for a registered simp relation.
pub fn is_simp_relation(env: &Environment, e: &Expr) -> Option<(Name, Expr, Expr)> {
    let e = e.strip_mdata();
    let Expr::Const(rel, _) = e.get_app_fn() else {
        return None;
    };
    if !env.is_relation(rel) {
        return None;
    }
    let args = e.get_app_args();
    if args.len() < 2 {
        return None;
    }
    Some((
        rel.clone(),
        args[args.len() - 2].clone(),
        args[args.len() - 1].clone(),
    ))
}

/// An indexed rewrite or congruence rule.
#[derive(Clone, Debug)]
pub struct SimpLemma {
    /// Identifier, for tracing
    pub id: Name,
    /// Relation of the conclusion
    pub rel: Name,
    pub num_umeta: u32,
    pub num_emeta: u32,
    /// Declared metavariable types, indexed by metavariable (may mention
    /// earlier metavariables)
    pub emeta_types: Vec<Expr>,
    /// Instance-implicit flag per metavariable
    pub instances: Vec<bool>,
    pub lhs: Expr,
    pub rhs: Expr,
    pub proof: Expr,
    /// Fires only when the instantiated rhs is strictly smaller than the
    /// lhs in the canonical order
    pub perm: bool,
    /// Proof-less: the conclusion holds by reflexivity
    pub is_refl: bool,
    pub priority: u32,
    /// Metavariable indices whose types are congruence hypotheses
    pub congr_hyps: Vec<u32>,
}

/// Head shape used as the index key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeadIndex {
    Const(Name),
    FVar(FVarId),
    Sort,
    Lam,
    Pi,
    Other,
}

/// The index key of a term: the shape of its application head.
pub fn head_index(e: &Expr) -> HeadIndex {
    match e.strip_mdata().get_app_fn().strip_mdata() {
        Expr::Const(n, _) => HeadIndex::Const(n.clone()),
        Expr::FVar(id) => {
            if fvar_meta_idx(*id).is_some() {
                HeadIndex::Other
            } else {
                HeadIndex::FVar(*id)
            }
        }
        Expr::Sort(_) => HeadIndex::Sort,
        Expr::Lam(..) => HeadIndex::Lam,
        Expr::Pi(..) => HeadIndex::Pi,
        _ => HeadIndex::Other,
    }
}

#[derive(Clone, Debug, Default)]
struct RelLemmas {
    simp: HashMap<HeadIndex, Vec<Arc<SimpLemma>>>,
    congr: HashMap<HeadIndex, Vec<Arc<SimpLemma>>>,
}

/// Per-relation lemma index (`SimpLemmas`).
#[derive(Clone, Debug, Default)]
pub struct SimpLemmaIndex {
    rels: HashMap<Name, RelLemmas>,
}

impl SimpLemmaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite lemmas for the head pattern of `e` under `rel`, highest
    /// priority first.
    pub fn find(&self, rel: &Name, e: &Expr) -> Option<&[Arc<SimpLemma>]> {
        self.rels
            .get(rel)?
            .simp
            .get(&head_index(e))
            .map(Vec::as_slice)
    }

    /// Congruence lemmas for the head pattern of `e` under `rel`.
    pub fn find_congr(&self, rel: &Name, e: &Expr) -> Option<&[Arc<SimpLemma>]> {
        self.rels
            .get(rel)?
            .congr
            .get(&head_index(e))
            .map(Vec::as_slice)
    }

    /// Add a declared constant as a rewrite lemma.
    pub fn add_decl(
        &mut self,
        ctx: &mut SimpCtx<'_>,
        name: &Name,
        priority: u32,
    ) -> Result<(), LemmaError> {
        let (ty, proof, num_umeta) = open_decl(ctx, name)?;
        self.add(ctx, name.clone(), &ty, proof, num_umeta, priority)
    }

    /// Add a rewrite lemma from an arbitrary proof (e.g. a local
    /// hypothesis).
    pub fn add(
        &mut self,
        ctx: &mut SimpCtx<'_>,
        id: Name,
        ty: &Expr,
        proof: Expr,
        num_umeta: u32,
        priority: u32,
    ) -> Result<(), LemmaError> {
        let lemma = compile(ctx, id, ty, proof, num_umeta, priority, false)?;
        let bucket = self
            .rels
            .entry(lemma.rel.clone())
            .or_default()
            .simp
            .entry(head_index(&lemma.lhs))
            .or_default();
        insert_by_priority(bucket, lemma);
        Ok(())
    }

    /// Add a declared constant as a congruence lemma.
    pub fn add_congr_decl(
        &mut self,
        ctx: &mut SimpCtx<'_>,
        name: &Name,
        priority: u32,
    ) -> Result<(), LemmaError> {
        let (ty, proof, num_umeta) = open_decl(ctx, name)?;
        let lemma = compile(ctx, name.clone(), &ty, proof, num_umeta, priority, true)?;
        let bucket = self
            .rels
            .entry(lemma.rel.clone())
            .or_default()
            .congr
            .entry(head_index(&lemma.lhs))
            .or_default();
        insert_by_priority(bucket, lemma);
        Ok(())
    }
}

fn insert_by_priority(bucket: &mut Vec<Arc<SimpLemma>>, lemma: SimpLemma) {
    let pos = bucket
        .iter()
        .position(|l| l.priority < lemma.priority)
        .unwrap_or(bucket.len());
    bucket.insert(pos, Arc::new(lemma));
}

fn open_decl(
    ctx: &SimpCtx<'_>,
    name: &Name,
) -> Result<(Expr, Expr, u32), LemmaError> {
    let info = ctx
        .env
        .get_const(name)
        .ok_or_else(|| LemmaError::UnknownConst(name.clone()))?;
    let num_umeta = info.level_params.len() as u32;
    let umetas: Vec<Level> = (0..num_umeta).map(Level::meta).collect();
    let ty = info.ty.instantiate_level_params(&info.level_params, &umetas);
    let proof = Expr::const_(name.clone(), umetas);
    Ok((ty, proof, num_umeta))
}

fn compile(
    ctx: &mut SimpCtx<'_>,
    id: Name,
    ty: &Expr,
    proof: Expr,
    num_umeta: u32,
    priority: u32,
    congr: bool,
) -> Result<SimpLemma, LemmaError> {
    let mut emeta_types = Vec::new();
    let mut instances = Vec::new();
    let mut congr_hyps = Vec::new();

    let mut it = ty.clone();
    let mut pf = proof;
    let mut idx = 0u32;
    loop {
        let Expr::Pi(bi, dom, body) = &it else { break };
        let bi = *bi;
        let dom = dom.as_ref().clone();
        if congr && is_congr_hyp(ctx.env, &dom) {
            validate_congr_hyp(ctx.env, &id, &dom)?;
            congr_hyps.push(idx);
        }
        emeta_types.push(dom);
        instances.push(bi.is_inst_implicit());
        pf = Expr::app(pf, meta_fvar(idx));
        let next = body.instantiate(&meta_fvar(idx));
        it = next;
        idx += 1;
    }
    let concl = it;

    let (rel, lhs, rhs, pf) = match is_simp_relation(ctx.env, &concl) {
        Some((rel, lhs, rhs)) => (rel, lhs, rhs, pf),
        None if congr => return Err(LemmaError::NotARelation(id)),
        None => fact_to_rewrite(ctx, &id, &concl, pf)?,
    };

    let is_refl = match pf.get_app_fn() {
        Expr::Const(n, _) => ctx
            .env
            .relation(&rel)
            .and_then(|r| r.refl.as_ref())
            .is_some_and(|refl| refl == n),
        _ => false,
    };

    Ok(SimpLemma {
        id,
        rel,
        num_umeta,
        num_emeta: idx,
        emeta_types,
        instances,
        perm: is_permutation(&lhs, &rhs),
        is_refl,
        lhs,
        rhs,
        proof: pf,
        priority,
        congr_hyps,
    })
}

/// Convert a proof of a bare proposition into an `Iff` rewrite:
/// `p` becomes `p <-> True`, `Not p` becomes `p <-> False`.
fn fact_to_rewrite(
    ctx: &mut SimpCtx<'_>,
    id: &Name,
    concl: &Expr,
    pf: Expr,
) -> Result<(Name, Expr, Expr, Expr), LemmaError> {
    // Ground facts must be propositions; quantified ones are taken on
    // faith and fail at application time if not.
    if !has_metavar(concl) && !ctx.is_prop(concl) {
        return Err(LemmaError::NotARelation(id.clone()));
    }
    let iff = Name::from_string("Iff");
    let stripped = concl.strip_mdata();
    if let Expr::App(f, p) = stripped {
        if matches!(f.strip_mdata(), Expr::Const(n, _) if n.as_str() == "Not") {
            let p = p.as_ref().clone();
            let fls = Expr::const_(Name::from_string("False"), vec![]);
            let wrapped = Expr::apps(
                Expr::const_(Name::from_string("iff_false_intro"), vec![]),
                [p.clone(), pf],
            );
            return Ok((iff, p, fls, wrapped));
        }
    }
    let tru = Expr::const_(Name::from_string("True"), vec![]);
    let wrapped = Expr::apps(
        Expr::const_(Name::from_string("iff_true_intro"), vec![]),
        [concl.clone(), pf],
    );
    Ok((iff, concl.clone(), tru, wrapped))
}

/// A congruence hypothesis is a Pi-closed relation statement.
fn is_congr_hyp(env: &Environment, dom: &Expr) -> bool {
    let mut it = dom.strip_mdata();
    while let Expr::Pi(_, _, body) = it {
        it = body.as_ref();
    }
    is_simp_relation(env, it).is_some()
}

/// The right-hand side of a congruence hypothesis must be a metavariable
/// applied to (a spine of) the hypothesis binders.
fn validate_congr_hyp(env: &Environment, id: &Name, dom: &Expr) -> Result<(), LemmaError> {
    let mut it = dom.strip_mdata();
    while let Expr::Pi(_, _, body) = it {
        it = body.as_ref();
    }
    let Some((_, _, rhs)) = is_simp_relation(env, it) else {
        return Err(LemmaError::BadCongrHyp(id.clone()));
    };
    if as_meta(rhs.get_app_fn()).is_none() {
        return Err(LemmaError::BadCongrHyp(id.clone()));
    }
    Ok(())
}

/// Are the two sides identical up to a bijection on metavariables?
fn is_permutation(lhs: &Expr, rhs: &Expr) -> bool {
    let mut fwd = HashMap::new();
    let mut bwd = HashMap::new();
    perm_core(lhs, rhs, &mut fwd, &mut bwd)
}

fn perm_core(
    a: &Expr,
    b: &Expr,
    fwd: &mut HashMap<u32, u32>,
    bwd: &mut HashMap<u32, u32>,
) -> bool {
    let a = a.strip_mdata();
    let b = b.strip_mdata();
    match (as_meta(a), as_meta(b)) {
        (Some(i), Some(j)) => {
            *fwd.entry(i).or_insert(j) == j && *bwd.entry(j).or_insert(i) == i
        }
        (None, None) => match (a, b) {
            (Expr::BVar(i), Expr::BVar(j)) => i == j,
            (Expr::FVar(i), Expr::FVar(j)) => i == j,
            (Expr::Sort(l1), Expr::Sort(l2)) => l1 == l2,
            (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => n1 == n2 && ls1 == ls2,
            (Expr::App(f1, a1), Expr::App(f2, a2)) => {
                perm_core(f1, f2, fwd, bwd) && perm_core(a1, a2, fwd, bwd)
            }
            (Expr::Lam(_, t1, b1), Expr::Lam(_, t2, b2))
            | (Expr::Pi(_, t1, b1), Expr::Pi(_, t2, b2)) => {
                perm_core(t1, t2, fwd, bwd) && perm_core(b1, b2, fwd, bwd)
            }
            (Expr::Let(t1, v1, b1), Expr::Let(t2, v2, b2)) => {
                perm_core(t1, t2, fwd, bwd)
                    && perm_core(v1, v2, fwd, bwd)
                    && perm_core(b1, b2, fwd, bwd)
            }
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instances::InstanceTable;
    use simp5_kernel::BinderInfo;

    fn c(name: &str) -> Expr {
        Expr::const_(Name::from_string(name), vec![])
    }

    fn eq_nat(l: Expr, r: Expr) -> Expr {
        let one = Level::succ(Level::zero());
        Expr::apps(
            Expr::const_(Name::from_string("Eq"), vec![one]),
            [c("Nat"), l, r],
        )
    }

    fn setup() -> (Environment, InstanceTable) {
        let mut env = Environment::new();
        env.init_core().unwrap();
        env.add_axiom(Name::from_string("Nat"), vec![], Expr::type_())
            .unwrap();
        env.add_axiom(Name::from_string("Nat.zero"), vec![], c("Nat"))
            .unwrap();
        env.add_axiom(
            Name::from_string("Nat.add"),
            vec![],
            Expr::arrow(c("Nat"), Expr::arrow(c("Nat"), c("Nat"))),
        )
        .unwrap();
        // add_zero : forall x, x + 0 = x
        env.add_axiom(
            Name::from_string("add_zero"),
            vec![],
            Expr::pi(
                BinderInfo::Default,
                c("Nat"),
                eq_nat(
                    Expr::apps(c("Nat.add"), [Expr::bvar(0), c("Nat.zero")]),
                    Expr::bvar(0),
                ),
            ),
        )
        .unwrap();
        // add_comm : forall x y, x + y = y + x
        env.add_axiom(
            Name::from_string("add_comm"),
            vec![],
            Expr::pi(
                BinderInfo::Default,
                c("Nat"),
                Expr::pi(
                    BinderInfo::Default,
                    c("Nat"),
                    eq_nat(
                        Expr::apps(c("Nat.add"), [Expr::bvar(1), Expr::bvar(0)]),
                        Expr::apps(c("Nat.add"), [Expr::bvar(0), Expr::bvar(1)]),
                    ),
                ),
            ),
        )
        .unwrap();
        env.add_axiom(Name::from_string("P"), vec![], Expr::prop())
            .unwrap();
        env.add_axiom(Name::from_string("hp"), vec![], c("P")).unwrap();
        (env, InstanceTable::new())
    }

    #[test]
    fn test_compile_rewrite_lemma() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_decl(&mut ctx, &Name::from_string("add_zero"), 100)
            .unwrap();

        let probe = Expr::apps(c("Nat.add"), [c("Nat.zero"), c("Nat.zero")]);
        let found = slss.find(&Name::from_string("Eq"), &probe).unwrap();
        assert_eq!(found.len(), 1);
        let l = &found[0];
        assert_eq!(l.num_emeta, 1);
        assert!(!l.perm);
        assert!(!l.is_refl);
        assert_eq!(l.rhs, meta_fvar(0));
    }

    #[test]
    fn test_permutation_detected() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_decl(&mut ctx, &Name::from_string("add_comm"), 100)
            .unwrap();
        let probe = Expr::apps(c("Nat.add"), [c("Nat.zero"), c("Nat.zero")]);
        let found = slss.find(&Name::from_string("Eq"), &probe).unwrap();
        assert!(found[0].perm);
    }

    #[test]
    fn test_fact_becomes_iff_true() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add(
            &mut ctx,
            Name::from_string("hp"),
            &c("P"),
            c("hp"),
            0,
            100,
        )
        .unwrap();
        let found = slss.find(&Name::from_string("Iff"), &c("P")).unwrap();
        assert_eq!(found[0].rhs, c("True"));
        // and the wrapped proof type checks as P <-> True
        let pf = found[0].proof.clone();
        let ty = ctx.infer(&pf).unwrap();
        let expected = Expr::apps(
            Expr::const_(Name::from_string("Iff"), vec![]),
            [c("P"), c("True")],
        );
        assert!(ctx.is_def_eq(&ty, &expected));
    }

    #[test]
    fn test_non_prop_fact_rejected() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        let r = slss.add(
            &mut ctx,
            Name::from_string("Nat.zero"),
            &c("Nat"),
            c("Nat.zero"),
            0,
            100,
        );
        assert!(matches!(r, Err(LemmaError::NotARelation(_))));
    }

    #[test]
    fn test_priority_ordering_in_bucket() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_decl(&mut ctx, &Name::from_string("add_comm"), 50)
            .unwrap();
        slss.add_decl(&mut ctx, &Name::from_string("add_zero"), 200)
            .unwrap();
        let probe = Expr::apps(c("Nat.add"), [c("Nat.zero"), c("Nat.zero")]);
        let found = slss.find(&Name::from_string("Eq"), &probe).unwrap();
        assert_eq!(found[0].id, Name::from_string("add_zero"));
        assert_eq!(found[1].id, Name::from_string("add_comm"));
    }

    #[test]
    fn test_congr_lemma_compiles() {
        let (mut env, inst) = setup();
        env.add_axiom(
            Name::from_string("And"),
            vec![],
            Expr::arrow(Expr::prop(), Expr::arrow(Expr::prop(), Expr::prop())),
        )
        .unwrap();
        // and_congr : forall {a b c d}, (a <-> c) -> (b <-> d) ->
        //             (And a b <-> And c d)
        let iff = |a: Expr, b: Expr| {
            Expr::apps(Expr::const_(Name::from_string("Iff"), vec![]), [a, b])
        };
        let v = Expr::bvar;
        let ty = Expr::pi(
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
        );
        env.add_axiom(Name::from_string("and_congr"), vec![], ty).unwrap();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_congr_decl(&mut ctx, &Name::from_string("and_congr"), 100)
            .unwrap();
        let probe = Expr::apps(c("And"), [c("P"), c("P")]);
        let found = slss.find_congr(&Name::from_string("Iff"), &probe).unwrap();
        assert_eq!(found[0].congr_hyps, vec![4, 5]);
    }

    #[test]
    fn test_is_simp_relation() {
        let (env, _) = setup();
        let e = eq_nat(c("Nat.zero"), c("Nat.zero"));
        let (rel, lhs, rhs) = is_simp_relation(&env, &e).unwrap();
        assert_eq!(rel, Name::from_string("Eq"));
        assert_eq!(lhs, c("Nat.zero"));
        assert_eq!(rhs, c("Nat.zero"));
        assert!(is_simp_relation(&env, &c("Nat.zero")).is_none());
    }
}
