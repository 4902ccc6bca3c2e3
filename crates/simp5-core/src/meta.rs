//! Temporary metavariable contexts
//!
//! Every lemma attempt allocates a fresh `MetaCtx` sized to the lemma's
//! universe and expression metavariable counts. A failed attempt simply
//! drops the context, so no assignment can leak into a later candidate.
//!
//! Expression metavariables are encoded as free variables with the high
//! identifier bit set; the local-context counter never reaches that range,
//! so the two cannot collide. Universe metavariables use the `Level::Meta`
//! constructor, indexed per attempt.

use crate::ctx::SimpCtx;
use simp5_kernel::{Expr, FVarId, Level};

/// High-bit tag distinguishing metavariable FVars from user locals.
pub const META_FVAR_TAG: u64 = 1 << 63;

/// The expression standing for the metavariable with the given index.
pub fn meta_fvar(idx: u32) -> Expr {
    Expr::fvar(FVarId(META_FVAR_TAG | u64::from(idx)))
}

/// Try to decode a metavariable index from a free variable id.
pub fn fvar_meta_idx(id: FVarId) -> Option<u32> {
    if id.0 & META_FVAR_TAG != 0 {
        Some((id.0 & !META_FVAR_TAG) as u32)
    } else {
        None
    }
}

/// Try to view an expression as a bare metavariable.
pub fn as_meta(e: &Expr) -> Option<u32> {
    match e {
        Expr::FVar(id) => fvar_meta_idx(*id),
        _ => None,
    }
}

/// Check whether an expression mentions any expression or universe
/// metavariable.
pub fn has_metavar(e: &Expr) -> bool {
    e.has_level_meta() || e.find_fvar(&|id| fvar_meta_idx(id).is_some())
}

/// A temporary metavariable context for a single lemma or unification
/// attempt.
#[derive(Clone, Debug, Default)]
pub struct MetaCtx {
    etypes: Vec<Expr>,
    eassign: Vec<Option<Expr>>,
    einst: Vec<bool>,
    uassign: Vec<Option<Level>>,
}

/// A saved assignment state, for backtracking inside a single attempt.
#[derive(Clone, Debug)]
pub struct MetaSnapshot {
    eassign: Vec<Option<Expr>>,
    uassign: Vec<Option<Level>>,
}

impl MetaCtx {
    /// Create a context with the given number of universe metavariables and
    /// no expression metavariables yet.
    pub fn new(num_umeta: u32) -> Self {
        MetaCtx {
            etypes: Vec::new(),
            eassign: Vec::new(),
            einst: Vec::new(),
            uassign: vec![None; num_umeta as usize],
        }
    }

    /// Declare the next expression metavariable; returns its index.
    pub fn push_emeta(&mut self, ty: Expr, is_instance: bool) -> u32 {
        let idx = self.etypes.len() as u32;
        self.etypes.push(ty);
        self.eassign.push(None);
        self.einst.push(is_instance);
        idx
    }

    pub fn num_emeta(&self) -> u32 {
        self.etypes.len() as u32
    }

    pub fn num_umeta(&self) -> u32 {
        self.uassign.len() as u32
    }

    /// The declared type of a metavariable (may mention earlier metas).
    pub fn etype(&self, idx: u32) -> Expr {
        self.etypes[idx as usize].clone()
    }

    pub fn is_instance(&self, idx: u32) -> bool {
        self.einst[idx as usize]
    }

    pub fn is_eassigned(&self, idx: u32) -> bool {
        self.eassign[idx as usize].is_some()
    }

    pub fn is_uassigned(&self, idx: u32) -> bool {
        self.uassign[idx as usize].is_some()
    }

    pub fn get(&self, idx: u32) -> Option<&Expr> {
        self.eassign[idx as usize].as_ref()
    }

    pub fn get_univ(&self, idx: u32) -> Option<&Level> {
        self.uassign[idx as usize].as_ref()
    }

    /// Assign a metavariable. Returns false if already assigned.
    pub fn assign(&mut self, idx: u32, val: Expr) -> bool {
        let slot = &mut self.eassign[idx as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(val);
        true
    }

    pub fn assign_univ(&mut self, idx: u32, val: Level) -> bool {
        let slot = &mut self.uassign[idx as usize];
        if slot.is_some() {
            return false;
        }
        *slot = Some(val);
        true
    }

    pub fn save(&self) -> MetaSnapshot {
        MetaSnapshot {
            eassign: self.eassign.clone(),
            uassign: self.uassign.clone(),
        }
    }

    pub fn restore(&mut self, snap: MetaSnapshot) {
        self.eassign = snap.eassign;
        self.uassign = snap.uassign;
    }

    /// Substitute all assigned metavariables, recursively.
    pub fn instantiate(&self, e: &Expr) -> Expr {
        match e {
            Expr::FVar(id) => {
                if let Some(idx) = fvar_meta_idx(*id) {
                    if let Some(Some(val)) = self.eassign.get(idx as usize) {
                        return self.instantiate(val);
                    }
                }
                e.clone()
            }
            Expr::Sort(l) => Expr::Sort(self.instantiate_level(l)),
            Expr::Const(n, ls) => Expr::Const(
                n.clone(),
                ls.iter().map(|l| self.instantiate_level(l)).collect(),
            ),
            Expr::BVar(_) => e.clone(),
            Expr::App(f, a) => Expr::app(self.instantiate(f), self.instantiate(a)),
            Expr::Lam(bi, ty, body) => {
                Expr::lam(*bi, self.instantiate(ty), self.instantiate(body))
            }
            Expr::Pi(bi, ty, body) => {
                Expr::pi(*bi, self.instantiate(ty), self.instantiate(body))
            }
            Expr::Let(ty, val, body) => Expr::let_(
                self.instantiate(ty),
                self.instantiate(val),
                self.instantiate(body),
            ),
            Expr::MData(tag, inner) => Expr::mdata(tag.clone(), self.instantiate(inner)),
        }
    }

    /// Substitute assigned universe metavariables.
    pub fn instantiate_level(&self, l: &Level) -> Level {
        l.instantiate_metas(&|i| {
            self.uassign
                .get(i as usize)
                .and_then(|slot| slot.clone())
        })
    }

    /// Check whether a metavariable occurs in an expression after
    /// instantiation.
    pub fn occurs(&self, idx: u32, e: &Expr) -> bool {
        self.instantiate(e)
            .find_fvar(&|id| fvar_meta_idx(id) == Some(idx))
    }
}

/// Match a pattern containing metavariables against a ground target term,
/// assigning metavariables in `metas`.
///
/// Supports first-order matching plus higher-order *patterns*: a
/// metavariable applied to exactly the enclosing bound variables is
/// assigned the lambda abstraction of the target. Ground mismatches fall
/// back to definitional equality.
pub fn match_pattern(
    ctx: &mut SimpCtx<'_>,
    metas: &mut MetaCtx,
    pattern: &Expr,
    target: &Expr,
) -> bool {
    Matcher {
        ctx,
        metas,
        binders: Vec::new(),
    }
    .matches(pattern, target)
}

struct Matcher<'m, 'e> {
    ctx: &'m mut SimpCtx<'e>,
    metas: &'m mut MetaCtx,
    /// Domains of the binders entered so far (target side), outermost first.
    binders: Vec<Expr>,
}

impl Matcher<'_, '_> {
    fn matches(&mut self, pattern: &Expr, target: &Expr) -> bool {
        let p = self.metas.instantiate(pattern);
        let p = p.strip_mdata();
        let t = target.strip_mdata();

        if p == t {
            return true;
        }

        if let Some(idx) = as_meta(p) {
            return self.assign_plain(idx, t);
        }

        if p.is_app() {
            if let Some(idx) = as_meta(p.get_app_fn()) {
                return self.assign_spine(idx, &p.get_app_args(), t);
            }
        }

        match (p, t) {
            (Expr::Sort(lp), Expr::Sort(lt)) => self.match_level(lp, lt),
            (Expr::Const(n1, ls1), Expr::Const(n2, ls2)) => {
                n1 == n2
                    && ls1.len() == ls2.len()
                    && ls1.iter().zip(ls2.iter()).all(|(lp, lt)| self.match_level(lp, lt))
            }
            (Expr::BVar(i), Expr::BVar(j)) => i == j,
            (Expr::FVar(i), Expr::FVar(j)) => i == j,
            (Expr::App(pf, pa), Expr::App(tf, ta)) => {
                let snap = self.metas.save();
                if self.matches(pf, tf) && self.matches(pa, ta) {
                    return true;
                }
                self.metas.restore(snap);
                self.fallback(p, t)
            }
            (Expr::Lam(_, pd, pb), Expr::Lam(_, td, tb))
            | (Expr::Pi(_, pd, pb), Expr::Pi(_, td, tb)) => {
                if !self.matches(pd, td) {
                    return false;
                }
                self.binders.push(td.as_ref().clone());
                let r = self.matches(pb, tb);
                self.binders.pop();
                r
            }
            (Expr::Let(pt, pv, pb), Expr::Let(tt, tv, tb)) => {
                if !self.matches(pt, tt) || !self.matches(pv, tv) {
                    return false;
                }
                self.binders.push(tt.as_ref().clone());
                let r = self.matches(pb, tb);
                self.binders.pop();
                r
            }
            _ => self.fallback(p, t),
        }
    }

    fn assign_plain(&mut self, idx: u32, t: &Expr) -> bool {
        if let Some(v) = self.metas.get(idx) {
            let v = v.clone();
            if v == *t {
                return true;
            }
            if !v.has_loose_bvars() && !t.has_loose_bvars() {
                return self.ctx.is_def_eq(&v, t);
            }
            return false;
        }
        if t.has_loose_bvars() {
            // the assignment would escape its binders
            return false;
        }
        self.metas.assign(idx, t.clone())
    }

    /// Higher-order pattern: `?m` applied to exactly the innermost bound
    /// variables, in order. The target is abstracted over those binders.
    fn assign_spine(&mut self, idx: u32, spine: &[Expr], t: &Expr) -> bool {
        if self.metas.is_eassigned(idx) {
            return false;
        }
        let m = spine.len() as u32;
        if u64::from(m) > self.binders.len() as u64 {
            return false;
        }
        for (k, a) in spine.iter().enumerate() {
            match a {
                Expr::BVar(j) if *j == m - 1 - k as u32 => {}
                _ => return false,
            }
        }
        if t.has_loose_bvar_ge(m) {
            return false;
        }
        let mut val = t.clone();
        for k in 0..m as usize {
            let dom = self.binders[self.binders.len() - 1 - k].clone();
            val = Expr::lam(simp5_kernel::BinderInfo::Default, dom, val);
        }
        if val.has_loose_bvars() {
            return false;
        }
        self.metas.assign(idx, val)
    }

    fn match_level(&mut self, lp: &Level, lt: &Level) -> bool {
        let lp = self.metas.instantiate_level(lp);
        if Level::is_def_eq(&lp, lt) {
            return true;
        }
        match (&lp, lt) {
            (Level::Meta(j), _) => self.metas.assign_univ(*j, lt.clone()),
            (Level::Succ(a), Level::Succ(b)) => self.match_level(a, b),
            (Level::Max(a1, a2), Level::Max(b1, b2))
            | (Level::IMax(a1, a2), Level::IMax(b1, b2)) => {
                self.match_level(a1, b1) && self.match_level(a2, b2)
            }
            // Under-determined shapes (e.g. imax of two metas against a
            // concrete level) are postponed; unresolved metas are caught by
            // the caller's assignment checks.
            _ => lp.has_meta(),
        }
    }

    fn fallback(&mut self, p: &Expr, t: &Expr) -> bool {
        if !has_metavar(p) && !p.has_loose_bvars() && !t.has_loose_bvars() {
            return self.ctx.is_def_eq(p, t);
        }
        if !t.has_loose_bvars() {
            let t_whnf = self.ctx.whnf(t);
            if t_whnf != *t {
                return self.matches(p, &t_whnf);
            }
        }
        false
    }
}
