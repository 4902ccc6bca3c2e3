//! The simplification driver
//!
//! `Simplifier` walks a term recursively, consulting its cache, applying
//! pre/post hooks, and descending through applications and binders with
//! whichever congruence machinery fits the term shape and the active
//! relation. Rewriting happens in post position; joins compose results
//! along the path. The traversal is single-threaded and cooperatively
//! preemptible: a cancellation flag is polled at the top of every visit,
//! and a step budget bounds the total number of visits.

use hashbrown::HashMap;
use simp5_kernel::env::{eq_name, iff_name, Environment};
use simp5_kernel::{Expr, FVarId, Name};
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::app_builder::{
    mk_app, mk_congr, mk_congr_arg, mk_congr_fun, mk_funext, mk_propext, mk_refl,
    mk_true_intro, AppBuilderError,
};
use crate::canonize::{remove_unnecessary_casts, DefeqCanonizer};
use crate::congr::{fun_params, mk_specialized_congr_simp, CongrArgKind};
use crate::ctx::SimpCtx;
use crate::hooks::{HookResult, Hooks};
use crate::instances::{synth_instance, InstanceTable, DEFAULT_PRIORITY};
use crate::lemmas::{is_simp_relation, SimpLemma, SimpLemmaIndex};
use crate::meta::{as_meta, has_metavar, match_pattern, MetaCtx};
use crate::order;
use crate::result::{finalize, join, lift_from_eq, SimpResult};

/// Configuration of one simplifier invocation.
#[derive(Clone, Debug)]
pub struct SimpConfig {
    /// Upper bound on `visit` invocations.
    pub max_steps: usize,
    /// Add hypotheses found under binders and left of arrows to the
    /// active lemma set.
    pub contextual: bool,
    /// For a reflexive relation other than equality, additionally try an
    /// equality simplification of each term and lift the result.
    pub lift_eq: bool,
    /// Canonicalize instance-implicit arguments up front.
    pub canonize_instances: bool,
    /// Canonicalize propositional arguments up front.
    pub canonize_proofs: bool,
    /// Permit congruence over lambdas (funext) and over forall/arrow
    /// propositions.
    pub use_axioms: bool,
    /// Cooperative cancellation flag, polled at every visit.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for SimpConfig {
    fn default() -> Self {
        SimpConfig {
            max_steps: 1_000_000,
            contextual: false,
            lift_eq: true,
            canonize_instances: false,
            canonize_proofs: false,
            use_axioms: true,
            cancel: None,
        }
    }
}

impl SimpConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimpError {
    #[error("simplify failed, maximum number of steps exceeded")]
    StepBudgetExceeded,
    #[error("simplify cancelled")]
    Cancelled,
    #[error("simplify made no progress")]
    NothingToSimplify,
    #[error("simplifier invariant violated: {0}")]
    Invariant(String),
}

impl From<AppBuilderError> for SimpError {
    fn from(err: AppBuilderError) -> Self {
        SimpError::Invariant(err.to_string())
    }
}

/// Record of one congruence hypothesis while a user congruence lemma is
/// being applied.
struct CongrHypRec {
    proof_meta: u32,
    locals: Vec<FVarId>,
    rel: Name,
    res: SimpResult,
}

/// The in-flight state of one simplification call.
pub struct Simplifier<'a, 'h> {
    ctx: SimpCtx<'a>,
    cfg: SimpConfig,
    slss: SimpLemmaIndex,
    rel: Name,
    cache: HashMap<Expr, SimpResult>,
    canon: DefeqCanonizer,
    num_steps: usize,
    need_restart: bool,
    discharge_depth: u32,
    hooks: Option<&'h mut dyn Hooks>,
}

impl<'a, 'h> Simplifier<'a, 'h> {
    /// The plain simplifier: built-in rewriting in post position, the
    /// nested prover for side conditions.
    pub fn new(ctx: SimpCtx<'a>, slss: SimpLemmaIndex, cfg: SimpConfig) -> Self {
        Simplifier {
            ctx,
            cfg,
            slss,
            rel: eq_name(),
            cache: HashMap::new(),
            canon: DefeqCanonizer::new(),
            num_steps: 0,
            need_restart: false,
            discharge_depth: 0,
            hooks: None,
        }
    }

    /// The script-driven simplifier: the hook object takes over pre, post
    /// and prove entirely.
    pub fn with_hooks(
        ctx: SimpCtx<'a>,
        slss: SimpLemmaIndex,
        cfg: SimpConfig,
        hooks: &'h mut dyn Hooks,
    ) -> Self {
        Simplifier {
            hooks: Some(hooks),
            ..Simplifier::new(ctx, slss, cfg)
        }
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn ctx_mut(&mut self) -> &mut SimpCtx<'a> {
        &mut self.ctx
    }

    fn check_system(&self) -> Result<(), SimpError> {
        if let Some(flag) = &self.cfg.cancel {
            if flag.load(Ordering::Relaxed) {
                return Err(SimpError::Cancelled);
            }
        }
        Ok(())
    }

    fn inc_num_steps(&mut self) -> Result<(), SimpError> {
        self.num_steps += 1;
        if self.num_steps > self.cfg.max_steps {
            return Err(SimpError::StepBudgetExceeded);
        }
        Ok(())
    }

    fn should_defeq_canonize(&self) -> bool {
        self.cfg.canonize_instances || self.cfg.canonize_proofs
    }

    fn join(&mut self, r1: SimpResult, r2: SimpResult) -> Result<SimpResult, SimpError> {
        let rel = self.rel.clone();
        join(&mut self.ctx, &rel, r1, r2)
    }

    fn is_dependent_fn(&mut self, f: &Expr) -> Result<bool, SimpError> {
        let ty = self
            .ctx
            .infer(f)
            .map_err(|e| SimpError::Invariant(format!("untypable application head: {e}")))?;
        let ty = self.ctx.whnf(&ty);
        Ok(matches!(&ty, Expr::Pi(_, _, body) if body.has_loose_bvar(0)))
    }

    /// C7: assign the remaining expression metavariables of a lemma
    /// attempt, in reverse declaration order. Instance-implicit metas go
    /// through class synthesis, propositional ones through `prove`.
    /// Failure skips the candidate.
    fn instantiate_emetas(&mut self, metas: &mut MetaCtx) -> bool {
        for i in (0..metas.num_emeta()).rev() {
            let mvar_ty = metas.instantiate(&metas.etype(i));
            if has_metavar(&mvar_ty) {
                trace!(target: "simplify.failure",
                       "metavariable type not ground: {mvar_ty:?}");
                return false;
            }
            if metas.is_eassigned(i) {
                continue;
            }
            if metas.is_instance(i) {
                match synth_instance(&mut self.ctx, &mvar_ty) {
                    Some(v) => {
                        metas.assign(i, v);
                    }
                    None => {
                        trace!(target: "simplify.failure",
                               "unable to synthesize instance for: {mvar_ty:?}");
                        return false;
                    }
                }
            }
            if metas.is_eassigned(i) {
                continue;
            }
            if self.ctx.is_prop(&mvar_ty) {
                if let Some(pf) = self.prove(&mvar_ty) {
                    metas.assign(i, pf);
                    continue;
                }
            }
            trace!(target: "simplify.failure", "failed to assign metavariable of type: {mvar_ty:?}");
            return false;
        }
        true
    }

    /// Discharge a propositional side condition: user hook if present,
    /// otherwise a nested prove-by-simp over the current lemma set.
    fn prove(&mut self, ty: &Expr) -> Option<Expr> {
        if let Some(h) = self.hooks.as_mut() {
            return h.prove(&mut self.ctx, &self.slss, &self.rel, ty);
        }
        if self.discharge_depth > 0 {
            return None;
        }
        let mut nested = Simplifier::new(
            SimpCtx::with_locals(self.ctx.env, self.ctx.instances, self.ctx.locals().clone()),
            self.slss.clone(),
            self.cfg.clone(),
        );
        nested.discharge_depth = self.discharge_depth + 1;
        nested.prove_by_simp(&iff_name(), ty).ok().flatten()
    }

    /// Extend the lemma set with local hypotheses; failures are ignored.
    fn add_to_slss(&mut self, ids: &[FVarId]) -> SimpLemmaIndex {
        let decls: Vec<(FVarId, Name, Expr)> = ids
            .iter()
            .filter_map(|id| {
                self.ctx
                    .local_decl(*id)
                    .map(|d| (*id, d.name.clone(), d.ty.clone()))
            })
            .collect();
        let mut slss = self.slss.clone();
        for (id, name, ty) in decls {
            let lemma_id = if name.is_anon() {
                Name::from_string(&format!("_hyp_{}", id.0))
            } else {
                name
            };
            match slss.add(&mut self.ctx, lemma_id.clone(), &ty, Expr::fvar(id), 0, DEFAULT_PRIORITY)
            {
                Ok(()) => {
                    trace!(target: "simplify.context", "{}: {ty:?}", lemma_id);
                }
                Err(_) => {}
            }
        }
        slss
    }

    // ------------------------------------------------------------------
    // C2: the rewriter
    // ------------------------------------------------------------------

    /// Rewrite the head of `e` with the first applicable indexed lemma.
    pub fn rewrite(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        let lemmas: Vec<Arc<SimpLemma>> = match self.slss.find(&self.rel, e) {
            Some(ls) => ls.to_vec(),
            None => return Ok(SimpResult::refl(e.clone())),
        };
        for lemma in lemmas {
            let r = self.rewrite_with(e, &lemma)?;
            if r.new_term() != e {
                debug!(target: "simplify.rewrite",
                       "[{}]: {e:?} ==> {:?}", lemma.id, r.new_term());
                return Ok(r);
            }
        }
        Ok(SimpResult::refl(e.clone()))
    }

    fn rewrite_with(&mut self, e: &Expr, sl: &SimpLemma) -> Result<SimpResult, SimpError> {
        let mut metas = MetaCtx::new(sl.num_umeta);
        for (ty, inst) in sl.emeta_types.iter().zip(&sl.instances) {
            metas.push_emeta(ty.clone(), *inst);
        }

        if !match_pattern(&mut self.ctx, &mut metas, &sl.lhs, e) {
            trace!(target: "debug.simplify.try_rewrite",
                   "fail to unify '{}':\n{e:?}\n=?=\n{:?}", sl.id, sl.lhs);
            return Ok(SimpResult::refl(e.clone()));
        }

        if !self.instantiate_emetas(&mut metas) {
            trace!(target: "debug.simplify.try_rewrite",
                   "fail to instantiate emetas: {}", sl.id);
            return Ok(SimpResult::refl(e.clone()));
        }

        for j in 0..sl.num_umeta {
            if !metas.is_uassigned(j) {
                trace!(target: "debug.simplify.try_rewrite",
                       "fail to instantiate umetas: {}", sl.id);
                return Ok(SimpResult::refl(e.clone()));
            }
        }

        let new_lhs = metas.instantiate(&sl.lhs);
        let new_rhs = metas.instantiate(&sl.rhs);
        if sl.perm && !order::is_lt(&new_rhs, &new_lhs) {
            trace!(target: "simplify.perm",
                   "perm rejected: {new_rhs:?} !< {new_lhs:?}");
            return Ok(SimpResult::refl(e.clone()));
        }

        if sl.is_refl {
            Ok(SimpResult::refl(new_rhs))
        } else {
            let pf = metas.instantiate(&sl.proof);
            Ok(SimpResult::mk(new_rhs, pf))
        }
    }

    /// Under equality, additionally try the biconditional lemmas and wrap
    /// a found proof with propositional extensionality.
    fn propext_rewrite(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        if self.rel != eq_name() {
            return Ok(SimpResult::refl(e.clone()));
        }
        let old_rel = mem::replace(&mut self.rel, iff_name());
        let r = self.rewrite(e);
        self.rel = old_rel;
        let r = r?;
        let (new, proof) = r.into_parts();
        match proof {
            None => Ok(SimpResult::refl(new)),
            Some(pf) => {
                let pf = mk_propext(&mut self.ctx, pf)?;
                Ok(SimpResult::mk(new, pf))
            }
        }
    }

    // ------------------------------------------------------------------
    // C4: user congruence lemmas
    // ------------------------------------------------------------------

    fn try_user_congrs(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        let lemmas: Vec<Arc<SimpLemma>> = match self.slss.find_congr(&self.rel, e) {
            Some(ls) => ls.to_vec(),
            None => return Ok(SimpResult::refl(e.clone())),
        };
        for cl in lemmas {
            let r = self.try_user_congr(e, &cl)?;
            if r.new_term() != e {
                return Ok(r);
            }
        }
        Ok(SimpResult::refl(e.clone()))
    }

    fn try_user_congr(&mut self, e: &Expr, cl: &SimpLemma) -> Result<SimpResult, SimpError> {
        let mut metas = MetaCtx::new(cl.num_umeta);
        for (ty, inst) in cl.emeta_types.iter().zip(&cl.instances) {
            metas.push_emeta(ty.clone(), *inst);
        }
        if !match_pattern(&mut self.ctx, &mut metas, &cl.lhs, e) {
            return Ok(SimpResult::refl(e.clone()));
        }
        trace!(target: "debug.simplify.try_congruence", "({}) {e:?}", cl.id);

        let mark = self.ctx.locals_mark();
        let out = self.try_user_congr_core(e, cl, &mut metas);
        self.ctx.truncate_locals(mark);
        out
    }

    fn try_user_congr_core(
        &mut self,
        e: &Expr,
        cl: &SimpLemma,
        metas: &mut MetaCtx,
    ) -> Result<SimpResult, SimpError> {
        let mut simplified = false;
        let mut recs: Vec<CongrHypRec> = Vec::new();

        for &h in &cl.congr_hyps {
            // Open the hypothesis binders as fresh locals.
            let mut m_ty = metas.instantiate(&metas.etype(h));
            let mut locals: Vec<FVarId> = Vec::new();
            loop {
                let Expr::Pi(bi, dom, body) = &m_ty else { break };
                let l = self
                    .ctx
                    .push_local(Name::anon(), dom.as_ref().clone(), *bi);
                let Expr::FVar(id) = l else { unreachable!() };
                locals.push(id);
                let next = body.instantiate(&l);
                m_ty = next;
            }
            let Some((h_rel, h_lhs, h_rhs)) = is_simp_relation(self.ctx.env, &m_ty) else {
                return Err(SimpError::Invariant(format!(
                    "congruence hypothesis of '{}' is not a relation statement",
                    cl.id
                )));
            };
            let h_lhs = metas.instantiate(&h_lhs);

            // Recursively simplify the hypothesis lhs under its own
            // relation, extending the lemma set when contextual. Both
            // situations invalidate the term-keyed cache for the subcall.
            let old_slss = if self.cfg.contextual {
                let extended = self.add_to_slss(&locals);
                Some(mem::replace(&mut self.slss, extended))
            } else {
                None
            };
            let need_fresh = self.cfg.contextual || self.rel != h_rel;
            let saved_cache = if need_fresh {
                Some(mem::take(&mut self.cache))
            } else {
                None
            };
            let old_rel = mem::replace(&mut self.rel, h_rel.clone());
            let r = self.visit(&h_lhs, Some(e));
            self.rel = old_rel;
            if let Some(c) = saved_cache {
                self.cache = c;
            }
            if let Some(s) = old_slss {
                self.slss = s;
            }
            let r = r?;

            if r.has_proof() {
                simplified = true;
            }

            // Assign the metavariable spine heading the hypothesis rhs to
            // the simplified term, abstracted over the binders.
            let h_rhs = metas.instantiate(&h_rhs);
            let Some(mi) = as_meta(h_rhs.get_app_fn()) else {
                return Err(SimpError::Invariant(format!(
                    "congruence hypothesis rhs of '{}' is not a metavariable spine",
                    cl.id
                )));
            };
            let mut spine_ids = Vec::new();
            for a in h_rhs.get_app_args() {
                let Expr::FVar(id) = a else {
                    return Err(SimpError::Invariant(format!(
                        "congruence hypothesis rhs of '{}' is not a metavariable spine",
                        cl.id
                    )));
                };
                spine_ids.push(id);
            }
            let val = self.ctx.mk_lambda(&spine_ids, r.new_term().clone());
            metas.assign(mi, val);

            recs.push(CongrHypRec {
                proof_meta: h,
                locals,
                rel: h_rel,
                res: r,
            });
        }

        if !simplified {
            return Ok(SimpResult::refl(e.clone()));
        }

        // Second pass: materialize the hypothesis proofs.
        for rec in recs {
            let fin = finalize(&mut self.ctx, &rec.rel, rec.res)?;
            let (_, proof) = fin.into_parts();
            let Some(pf) = proof else {
                return Err(SimpError::Invariant(
                    "finalize produced no proof".to_string(),
                ));
            };
            let pf = self.ctx.mk_lambda(&rec.locals, pf);
            metas.assign(rec.proof_meta, pf);
        }

        if !self.instantiate_emetas(metas) {
            return Ok(SimpResult::refl(e.clone()));
        }
        for j in 0..cl.num_umeta {
            if !metas.is_uassigned(j) {
                return Ok(SimpResult::refl(e.clone()));
            }
        }

        let e_s = metas.instantiate(&cl.rhs);
        let pf = metas.instantiate(&cl.proof);
        debug!(target: "simplify.congruence", "({}) [{e:?} ==> {e_s:?}]", cl.id);
        Ok(SimpResult::mk(e_s, pf))
    }

    // ------------------------------------------------------------------
    // C3: synthesized equality congruence
    // ------------------------------------------------------------------

    fn try_auto_eq_congr(&mut self, e: &Expr) -> Result<Option<SimpResult>, SimpError> {
        debug_assert_eq!(self.rel, eq_name());
        let f = e.get_app_fn().clone();
        let args = e.get_app_args();
        let Some(cg) = mk_specialized_congr_simp(&mut self.ctx, e) else {
            return Ok(None);
        };
        if cg.arg_kinds.len() < args.len() {
            return Ok(None);
        }

        let mut r_args: Vec<Option<SimpResult>> = vec![None; args.len()];
        let mut has_proof = false;
        let mut has_cast = false;
        let mut has_simplified = false;

        // First pass: simplify the Eq arguments.
        for (i, kind) in cg.arg_kinds.iter().enumerate() {
            match kind {
                CongrArgKind::HEq => {
                    return Err(SimpError::Invariant(
                        "heterogeneous congruence parameter in auto congruence".to_string(),
                    ));
                }
                CongrArgKind::Fixed | CongrArgKind::FixedNoParam => {}
                CongrArgKind::Cast => {
                    has_cast = true;
                }
                CongrArgKind::Eq => {
                    let r = self.visit(&args[i], Some(e))?;
                    if r.has_proof() {
                        has_proof = true;
                    }
                    if r.new_term() != &args[i] {
                        has_simplified = true;
                    }
                    r_args[i] = Some(r);
                }
            }
        }

        if !has_simplified {
            let mut r = SimpResult::refl(e.clone());
            if has_cast {
                let stripped = remove_unnecessary_casts(&mut self.ctx, e);
                if &stripped != e {
                    r.update(stripped);
                }
            }
            return Ok(Some(r));
        }

        if !has_proof {
            let new_args: Vec<Expr> = args
                .iter()
                .enumerate()
                .map(|(i, a)| match &r_args[i] {
                    Some(r) => r.new_term().clone(),
                    None => a.clone(),
                })
                .collect();
            let mut r = SimpResult::refl(Expr::apps(f, new_args));
            if has_cast {
                let stripped = remove_unnecessary_casts(&mut self.ctx, r.new_term());
                if &stripped != r.new_term() {
                    r.update(stripped);
                }
            }
            return Ok(Some(r));
        }

        // Proof required: instantiate the congruence parameters in order.
        // Fixed and Cast positions supply the original argument, Eq
        // positions the rewritten argument with its finalized proof.
        let mut pf = mk_refl(&mut self.ctx, &eq_name(), &f)?;
        let mut new_args = Vec::with_capacity(args.len());
        for (i, kind) in cg.arg_kinds.iter().enumerate() {
            match kind {
                CongrArgKind::HEq => unreachable!("rejected in the first pass"),
                CongrArgKind::Fixed | CongrArgKind::FixedNoParam | CongrArgKind::Cast => {
                    pf = mk_congr_fun(&mut self.ctx, pf, args[i].clone())?;
                    new_args.push(args[i].clone());
                }
                CongrArgKind::Eq => {
                    let r = r_args[i]
                        .take()
                        .unwrap_or_else(|| SimpResult::refl(args[i].clone()));
                    let fin = finalize(&mut self.ctx, &eq_name(), r)?;
                    let (new, proof) = fin.into_parts();
                    let Some(arg_pf) = proof else {
                        return Err(SimpError::Invariant(
                            "finalize produced no proof".to_string(),
                        ));
                    };
                    pf = mk_congr(&mut self.ctx, pf, arg_pf)?;
                    new_args.push(new);
                }
            }
        }

        let mut r = SimpResult::mk(Expr::apps(f, new_args), pf);
        if has_cast {
            let stripped = remove_unnecessary_casts(&mut self.ctx, r.new_term());
            if &stripped != r.new_term() {
                r.update(stripped);
            }
        }
        Ok(Some(r))
    }

    // Generic binary congruence combinators.

    fn congr_fun_arg(
        &mut self,
        r_f: SimpResult,
        r_arg: SimpResult,
    ) -> Result<SimpResult, SimpError> {
        match (r_f.has_proof(), r_arg.has_proof()) {
            (false, false) => Ok(SimpResult::refl(Expr::app(
                r_f.new_term().clone(),
                r_arg.new_term().clone(),
            ))),
            (false, true) => self.congr_arg(r_f.new_term().clone(), r_arg),
            (true, false) => self.congr_fun(r_f, r_arg.new_term().clone()),
            (true, true) => self.congr(r_f, r_arg),
        }
    }

    fn congr(&mut self, r_f: SimpResult, r_arg: SimpResult) -> Result<SimpResult, SimpError> {
        let e = Expr::app(r_f.new_term().clone(), r_arg.new_term().clone());
        let (pf_f, pf_arg) = match (r_f.into_parts().1, r_arg.into_parts().1) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(SimpError::Invariant(
                    "congr requires proofs on both sides".to_string(),
                ))
            }
        };
        let pf = mk_congr(&mut self.ctx, pf_f, pf_arg)?;
        Ok(SimpResult::mk(e, pf))
    }

    fn congr_fun(&mut self, r_f: SimpResult, arg: Expr) -> Result<SimpResult, SimpError> {
        let e = Expr::app(r_f.new_term().clone(), arg.clone());
        let Some(pf_f) = r_f.into_parts().1 else {
            return Err(SimpError::Invariant(
                "congr_fun requires a function proof".to_string(),
            ));
        };
        let pf = mk_congr_fun(&mut self.ctx, pf_f, arg)?;
        Ok(SimpResult::mk(e, pf))
    }

    fn congr_arg(&mut self, f: Expr, r_arg: SimpResult) -> Result<SimpResult, SimpError> {
        let e = Expr::app(f.clone(), r_arg.new_term().clone());
        let Some(pf_arg) = r_arg.into_parts().1 else {
            return Err(SimpError::Invariant(
                "congr_arg requires an argument proof".to_string(),
            ));
        };
        let pf = mk_congr_arg(&mut self.ctx, f, pf_arg)?;
        Ok(SimpResult::mk(e, pf))
    }

    fn congr_funs(&mut self, r_f: SimpResult, args: &[Expr]) -> Result<SimpResult, SimpError> {
        let mut e = r_f.new_term().clone();
        for a in args {
            e = Expr::app(e, a.clone());
        }
        let (_, proof) = r_f.into_parts();
        let Some(mut pf) = proof else {
            return Ok(SimpResult::refl(e));
        };
        for a in args {
            pf = mk_congr_fun(&mut self.ctx, pf, a.clone())?;
        }
        Ok(SimpResult::mk(e, pf))
    }

    /// Re-visit the application head so transformations there propagate
    /// through the whole spine.
    fn visit_fn(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        if !e.is_app() {
            return Ok(SimpResult::refl(e.clone()));
        }
        let f = e.get_app_fn().clone();
        let args = e.get_app_args();
        let r_f = self.visit(&f, Some(e))?;
        self.congr_funs(r_f, &args)
    }

    // ------------------------------------------------------------------
    // C8 wiring
    // ------------------------------------------------------------------

    fn defeq_canonize_args_step(&mut self, e: &Expr) -> Expr {
        let f = e.get_app_fn().clone();
        let mut args = e.get_app_args();
        let Some(infos) = fun_params(&mut self.ctx, &f, args.len()) else {
            return e.clone();
        };
        let mut modified = false;
        for (i, info) in infos.iter().enumerate() {
            let selected = (self.cfg.canonize_instances && info.bi.is_inst_implicit())
                || (self.cfg.canonize_proofs && info.is_prop);
            if !selected {
                continue;
            }
            let new_a = self.canon.canonize(&mut self.ctx, &args[i]);
            if new_a != args[i] {
                trace!(target: "simplify.canonize", "{:?}\n==>\n{new_a:?}", args[i]);
                self.need_restart = true;
                args[i] = new_a;
                modified = true;
            }
        }
        if modified {
            Expr::apps(f, args)
        } else {
            e.clone()
        }
    }

    // ------------------------------------------------------------------
    // C5: binder congruence
    // ------------------------------------------------------------------

    fn visit_lambda(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        if self.rel != eq_name() || !self.cfg.use_axioms {
            return Ok(SimpResult::refl(e.clone()));
        }
        let mark = self.ctx.locals_mark();
        let out = self.visit_lambda_core(e);
        self.ctx.truncate_locals(mark);
        out
    }

    fn visit_lambda_core(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        let mut locals: Vec<FVarId> = Vec::new();
        let mut it = e.clone();
        loop {
            let Expr::Lam(bi, dom, body) = &it else { break };
            let l = self
                .ctx
                .push_local(Name::anon(), dom.as_ref().clone(), *bi);
            let Expr::FVar(id) = l else { unreachable!() };
            locals.push(id);
            let next = body.instantiate(&l);
            it = next;
        }

        let r = self.visit(&it, Some(e))?;
        if r.new_term() == &it {
            return Ok(SimpResult::refl(e.clone()));
        }

        let new_lam = self.ctx.mk_lambda(&locals, r.new_term().clone());
        let (_, proof) = r.into_parts();
        let Some(mut pr) = proof else {
            return Ok(SimpResult::refl(new_lam));
        };
        for id in locals.iter().rev() {
            let lam_pr = self.ctx.mk_lambda(&[*id], pr);
            pr = mk_funext(&mut self.ctx, lam_pr)?;
        }
        Ok(SimpResult::mk(new_lam, pr))
    }

    /// Congruence over a genuine forall (non-propositional domain).
    fn forall_congr(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        let Expr::Pi(bi, dom, body) = e else {
            return Err(SimpError::Invariant("forall_congr on non-Pi".to_string()));
        };
        let mark = self.ctx.locals_mark();
        let out = self.forall_congr_core(*bi, dom, body);
        self.ctx.truncate_locals(mark);
        out.map(|r| match r {
            Some(r) => r,
            None => SimpResult::refl(e.clone()),
        })
    }

    fn forall_congr_core(
        &mut self,
        bi: simp5_kernel::BinderInfo,
        dom: &Expr,
        body: &Expr,
    ) -> Result<Option<SimpResult>, SimpError> {
        let l = self
            .ctx
            .push_local(Name::anon(), dom.clone(), bi);
        let Expr::FVar(id) = l else { unreachable!() };
        let opened = body.instantiate(&l);

        let r = self.visit(&opened, None)?;
        if r.new_term() == &opened {
            return Ok(None);
        }
        let new_pi = self.ctx.mk_pi(&[id], r.new_term().clone());
        let (_, proof) = r.into_parts();
        let Some(pr) = proof else {
            return Ok(Some(SimpResult::refl(new_pi)));
        };
        let h = self.ctx.mk_lambda(&[id], pr);
        let lemma = if self.rel == eq_name() {
            Name::from_string("forallCongrEq")
        } else {
            Name::from_string("forallCongr")
        };
        let pf = mk_app(&mut self.ctx, &lemma, &[h])?;
        Ok(Some(SimpResult::mk(new_pi, pf)))
    }

    /// Congruence over a non-dependent arrow between propositions.
    fn imp_congr(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        let Some((a, b)) = e.unbind_arrow() else {
            return self.try_user_congrs(e);
        };
        let r_a = self.visit(&a, Some(e))?;

        if self.cfg.contextual {
            let mark = self.ctx.locals_mark();
            let out = self.imp_congr_contextual(e, &a, &b, r_a);
            self.ctx.truncate_locals(mark);
            out
        } else {
            let r_b = self.visit(&b, Some(e))?;
            if r_a.new_term() == &a && r_b.new_term() == &b {
                return Ok(SimpResult::refl(e.clone()));
            }
            let new_e = Expr::arrow(r_a.new_term().clone(), r_b.new_term().clone());
            if !r_a.has_proof() && !r_b.has_proof() {
                return Ok(SimpResult::refl(new_e));
            }
            let lemma = if self.rel == eq_name() {
                Name::from_string("impCongrEq")
            } else {
                Name::from_string("impCongr")
            };
            let rel = self.rel.clone();
            let pr_a = take_proof(finalize(&mut self.ctx, &rel, r_a)?)?;
            let pr_b = take_proof(finalize(&mut self.ctx, &rel, r_b)?)?;
            let pf = mk_app(&mut self.ctx, &lemma, &[pr_a, pr_b])?;
            Ok(SimpResult::mk(new_e, pf))
        }
    }

    fn imp_congr_contextual(
        &mut self,
        e: &Expr,
        a: &Expr,
        b: &Expr,
        r_a: SimpResult,
    ) -> Result<SimpResult, SimpError> {
        let h = self.ctx.push_local(
            Name::from_string("_h"),
            r_a.new_term().clone(),
            simp5_kernel::BinderInfo::Default,
        );
        let Expr::FVar(hid) = h else { unreachable!() };
        let extended = self.add_to_slss(&[hid]);
        let old_slss = mem::replace(&mut self.slss, extended);
        let saved_cache = mem::take(&mut self.cache);
        let r_b = self.visit(b, Some(e));
        self.cache = saved_cache;
        self.slss = old_slss;
        let r_b = r_b?;

        if r_a.new_term() == a && r_b.new_term() == b {
            return Ok(SimpResult::refl(e.clone()));
        }
        let new_e = Expr::arrow(r_a.new_term().clone(), r_b.new_term().clone());
        if !r_a.has_proof() && !r_b.has_proof() {
            return Ok(SimpResult::refl(new_e));
        }
        let lemma = if self.rel == eq_name() {
            Name::from_string("impCongrCtxEq")
        } else {
            Name::from_string("impCongrCtx")
        };
        let rel = self.rel.clone();
        let pr_a = take_proof(finalize(&mut self.ctx, &rel, r_a)?)?;
        let pr_b_body = take_proof(finalize(&mut self.ctx, &rel, r_b)?)?;
        let pr_b = self.ctx.mk_lambda(&[hid], pr_b_body);
        let pf = mk_app(&mut self.ctx, &lemma, &[pr_a, pr_b])?;
        Ok(SimpResult::mk(new_e, pf))
    }

    fn visit_pi(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        if (self.rel == eq_name() && self.cfg.use_axioms) || self.rel == iff_name() {
            if self.ctx.is_prop(e) {
                if let Expr::Pi(_, dom, _) = e {
                    let dom = dom.as_ref().clone();
                    if !self.ctx.is_prop(&dom) {
                        return self.forall_congr(e);
                    } else if e.is_arrow() {
                        return self.imp_congr(e);
                    }
                }
            }
        }
        self.try_user_congrs(e)
    }

    /// Let bodies are not traversed: abstracting a let body is not
    /// guaranteed to be type correct.
    fn visit_let(&mut self, e: &Expr) -> Result<SimpResult, SimpError> {
        Ok(SimpResult::refl(e.clone()))
    }

    fn visit_app(&mut self, e0: &Expr) -> Result<SimpResult, SimpError> {
        let e = if self.should_defeq_canonize() {
            self.defeq_canonize_args_step(e0)
        } else {
            e0.clone()
        };

        // (1) user-defined congruence lemmas
        let r_user = self.try_user_congrs(&e)?;
        if r_user.has_proof() {
            if self.rel == eq_name() {
                let v = self.visit_fn(&r_user.new_term().clone())?;
                return self.join(r_user, v);
            }
            return Ok(r_user);
        }

        if self.rel == eq_name() {
            // (2) synthesized congruence lemma
            if let Some(r_args) = self.try_auto_eq_congr(&e)? {
                let v = self.visit_fn(&r_args.new_term().clone())?;
                return self.join(r_args, v);
            }

            // (3) generic binary congruence
            let Expr::App(f, arg) = &e else {
                return Err(SimpError::Invariant("visit_app on non-app".to_string()));
            };
            let f = f.as_ref().clone();
            let arg = arg.as_ref().clone();
            let r_f = self.visit(&f, Some(&e))?;
            if self.is_dependent_fn(&f)? {
                if r_f.has_proof() {
                    return self.congr_fun(r_f, arg);
                }
                return Ok(SimpResult::refl(Expr::app(r_f.new_term().clone(), arg)));
            }
            let r_arg = self.visit(&arg, Some(&e))?;
            return self.congr_fun_arg(r_f, r_arg);
        }

        Ok(SimpResult::refl(e))
    }

    // ------------------------------------------------------------------
    // C6: the visitor
    // ------------------------------------------------------------------

    fn pre(&mut self, e: &Expr, parent: Option<&Expr>) -> HookResult {
        match self.hooks.as_mut() {
            Some(h) => h.pre(&mut self.ctx, &self.slss, &self.rel, parent, e),
            None => HookResult::NoChange,
        }
    }

    fn post(&mut self, e: &Expr, parent: Option<&Expr>) -> Result<HookResult, SimpError> {
        if let Some(h) = self.hooks.as_mut() {
            return Ok(h.post(&mut self.ctx, &self.slss, &self.rel, parent, e));
        }
        let r = self.rewrite(e)?;
        if r.new_term() != e {
            return Ok(HookResult::Continue(r));
        }
        if self.cfg.use_axioms {
            let r = self.propext_rewrite(e)?;
            if r.new_term() != e {
                return Ok(HookResult::Continue(r));
            }
        }
        Ok(HookResult::NoChange)
    }

    pub fn visit(&mut self, e: &Expr, parent: Option<&Expr>) -> Result<SimpResult, SimpError> {
        self.check_system()?;
        self.inc_num_steps()?;
        trace!(target: "simplify", "{}: {e:?}", self.rel);

        if let Some(r) = self.cache.get(e) {
            return Ok(r.clone());
        }

        let mut curr = SimpResult::refl(e.clone());
        match self.pre(e, parent) {
            HookResult::Done(r) => {
                self.cache.insert(e.clone(), r.clone());
                return Ok(r);
            }
            HookResult::Continue(r) => {
                curr = r;
            }
            HookResult::NoChange => {}
        }

        loop {
            let t = curr.new_term().clone();
            let structural = match &t {
                Expr::FVar(_) | Expr::Sort(_) | Expr::Const(..) | Expr::MData(..) => {
                    curr.clone()
                }
                Expr::BVar(_) => {
                    return Err(SimpError::Invariant(
                        "loose bound variable reached the visitor".to_string(),
                    ))
                }
                Expr::Lam(..) => {
                    let v = self.visit_lambda(&t)?;
                    self.join(curr.clone(), v)?
                }
                Expr::Pi(..) => {
                    let v = self.visit_pi(&t)?;
                    self.join(curr.clone(), v)?
                }
                Expr::App(..) => {
                    let v = self.visit_app(&t)?;
                    self.join(curr.clone(), v)?
                }
                Expr::Let(..) => {
                    let v = self.visit_let(&t)?;
                    self.join(curr.clone(), v)?
                }
            };

            let post_input = structural.new_term().clone();
            match self.post(&post_input, parent)? {
                HookResult::Done(r) => {
                    curr = self.join(structural, r)?;
                    break;
                }
                HookResult::NoChange => {
                    curr = structural;
                    break;
                }
                HookResult::Continue(r) => {
                    if r.new_term() == curr.new_term() {
                        // the rewrite cycled back to where this node
                        // started; keep the pre-descent result
                        break;
                    }
                    curr = self.join(structural, r)?;
                }
            }
        }

        // Relation lifting: try an equality pass and lift the result.
        if self.cfg.lift_eq
            && self.rel != eq_name()
            && self.ctx.env.is_refl_relation(&self.rel)
        {
            let subject = curr.new_term().clone();
            let old_rel = mem::replace(&mut self.rel, eq_name());
            let saved_cache = mem::take(&mut self.cache);
            let eq_r = self.visit(&subject, parent);
            self.rel = old_rel;
            self.cache = saved_cache;
            let eq_r = eq_r?;
            if eq_r.new_term() != &subject {
                let rel = self.rel.clone();
                if let Some(lifted) = lift_from_eq(&mut self.ctx, &rel, eq_r) {
                    curr = self.join(curr, lifted)?;
                    let again = self.visit(&curr.new_term().clone(), parent)?;
                    curr = self.join(curr, again)?;
                }
            }
        }

        self.cache.insert(e.clone(), curr.clone());
        Ok(curr)
    }

    /// Run one simplification to fixpoint, restarting (with a cleared
    /// cache) while defeq canonicalization keeps finding new canonical
    /// forms. Each restart strictly refines a partition bounded by the
    /// number of subterms, so the loop terminates.
    pub fn run(&mut self, rel: Name, e: &Expr) -> Result<SimpResult, SimpError> {
        self.rel = rel;
        self.cache.clear();
        let mut r = SimpResult::refl(e.clone());
        loop {
            self.need_restart = false;
            let v = self.visit(&r.new_term().clone(), None)?;
            r = self.join(r, v)?;
            if !self.need_restart || !self.should_defeq_canonize() {
                return Ok(r);
            }
            self.cache.clear();
        }
    }

    /// Simplify `e` under `rel` and close it outright when the normal form
    /// is a reflexivity instance or `True`.
    pub fn prove_by_simp(&mut self, rel: &Name, e: &Expr) -> Result<Option<Expr>, SimpError> {
        let r = self.run(rel.clone(), e)?;
        let Some(mpr) = self
            .ctx
            .env
            .relation(rel)
            .and_then(|ri| ri.mpr.clone())
        else {
            return Ok(None);
        };

        if let Some((rrel, lhs, rhs)) = is_simp_relation(self.ctx.env, r.new_term()) {
            if self.ctx.env.is_refl_relation(&rrel) && self.ctx.is_def_eq(&lhs, &rhs) {
                let refl_pf = mk_refl(&mut self.ctx, &rrel, &lhs)?;
                return Ok(Some(match r.proof() {
                    Some(pf) => mk_app(&mut self.ctx, &mpr, &[pf.clone(), refl_pf])?,
                    None => refl_pf,
                }));
            }
        }
        if matches!(r.new_term().strip_mdata(), Expr::Const(n, _) if n.as_str() == "True") {
            return Ok(Some(match r.proof() {
                Some(pf) => mk_app(&mut self.ctx, &mpr, &[pf.clone(), mk_true_intro()])?,
                None => mk_true_intro(),
            }));
        }
        Ok(None)
    }
}

fn take_proof(r: SimpResult) -> Result<Expr, SimpError> {
    match r.into_parts().1 {
        Some(pf) => Ok(pf),
        None => Err(SimpError::Invariant(
            "finalize produced no proof".to_string(),
        )),
    }
}

/// Simplify `e` under `rel`; the proof is present and finalized. Errors
/// with `NothingToSimplify` when the term is unchanged.
pub fn simplify(
    env: &Environment,
    instances: &InstanceTable,
    cfg: SimpConfig,
    slss: &SimpLemmaIndex,
    rel: &Name,
    e: &Expr,
) -> Result<(Expr, Expr), SimpError> {
    let ctx = SimpCtx::new(env, instances);
    let mut s = Simplifier::new(ctx, slss.clone(), cfg);
    let r = s.run(rel.clone(), e)?;
    if r.new_term() == e {
        return Err(SimpError::NothingToSimplify);
    }
    let r = finalize(&mut s.ctx, rel, r)?;
    let (new, proof) = r.into_parts();
    let pf = proof.ok_or_else(|| SimpError::Invariant("finalize produced no proof".to_string()))?;
    Ok((new, pf))
}

/// Simplify with user hooks driving pre/post/prove; any accumulator the
/// hooks thread lives in the hook object and is read back by the caller.
pub fn ext_simplify(
    env: &Environment,
    instances: &InstanceTable,
    cfg: SimpConfig,
    slss: &SimpLemmaIndex,
    hooks: &mut dyn Hooks,
    rel: &Name,
    e: &Expr,
) -> Result<(Expr, Expr), SimpError> {
    let ctx = SimpCtx::new(env, instances);
    let mut s = Simplifier::with_hooks(ctx, slss.clone(), cfg, hooks);
    let r = s.run(rel.clone(), e)?;
    if r.new_term() == e {
        return Err(SimpError::NothingToSimplify);
    }
    let r = finalize(&mut s.ctx, rel, r)?;
    let (new, proof) = r.into_parts();
    let pf = proof.ok_or_else(|| SimpError::Invariant("finalize produced no proof".to_string()))?;
    Ok((new, pf))
}

/// Prove `e` by simplifying it to a reflexivity instance or `True`.
pub fn prove_by_simp(
    env: &Environment,
    instances: &InstanceTable,
    cfg: SimpConfig,
    slss: &SimpLemmaIndex,
    rel: &Name,
    e: &Expr,
) -> Result<Option<Expr>, SimpError> {
    let ctx = SimpCtx::new(env, instances);
    let mut s = Simplifier::new(ctx, slss.clone(), cfg);
    s.prove_by_simp(rel, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use simp5_kernel::{BinderInfo, Level};

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
        env.add_axiom(Name::from_string("a"), vec![], c("Nat")).unwrap();
        env.add_axiom(
            Name::from_string("Nat.add"),
            vec![],
            Expr::arrow(c("Nat"), Expr::arrow(c("Nat"), c("Nat"))),
        )
        .unwrap();
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
        (env, InstanceTable::new())
    }

    #[test]
    fn test_empty_index_is_identity() {
        let (env, inst) = setup();
        let slss = SimpLemmaIndex::new();
        let e = Expr::apps(c("Nat.add"), [c("a"), c("Nat.zero")]);
        let r = simplify(&env, &inst, SimpConfig::new(), &slss, &eq_name(), &e);
        assert!(matches!(r, Err(SimpError::NothingToSimplify)));
    }

    #[test]
    fn test_step_budget_enforced() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_decl(&mut ctx, &Name::from_string("add_zero"), 100)
            .unwrap();
        let mut e = c("a");
        for _ in 0..50 {
            e = Expr::apps(c("Nat.add"), [e, c("Nat.zero")]);
        }
        let cfg = SimpConfig {
            max_steps: 3,
            ..SimpConfig::new()
        };
        let r = simplify(&env, &inst, cfg, &slss, &eq_name(), &e);
        assert!(matches!(r, Err(SimpError::StepBudgetExceeded)));
    }

    #[test]
    fn test_cancellation() {
        let (env, inst) = setup();
        let slss = SimpLemmaIndex::new();
        let flag = Arc::new(AtomicBool::new(true));
        let cfg = SimpConfig {
            cancel: Some(flag),
            ..SimpConfig::new()
        };
        let e = c("a");
        let r = simplify(&env, &inst, cfg, &slss, &eq_name(), &e);
        assert!(matches!(r, Err(SimpError::Cancelled)));
    }

    #[test]
    fn test_visit_count_within_budget() {
        let (env, inst) = setup();
        let mut ctx = SimpCtx::new(&env, &inst);
        let mut slss = SimpLemmaIndex::new();
        slss.add_decl(&mut ctx, &Name::from_string("add_zero"), 100)
            .unwrap();
        let e = Expr::apps(c("Nat.add"), [c("a"), c("Nat.zero")]);
        let ctx2 = SimpCtx::new(&env, &inst);
        let mut s = Simplifier::new(ctx2, slss, SimpConfig::new());
        let r = s.run(eq_name(), &e).unwrap();
        assert_eq!(r.new_term(), &c("a"));
        assert!(s.num_steps() <= SimpConfig::new().max_steps + 1);
    }
}
