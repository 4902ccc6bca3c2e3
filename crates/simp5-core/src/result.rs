//! Simp results
//!
//! The `(newTerm, optionalProof)` pair the simplifier threads along a
//! rewrite path. A result without a proof asserts that the old and new
//! terms are identical or related by reflexivity of the active relation;
//! the reflexivity witness is only materialized on demand (`finalize`), to
//! keep proof terms small.

use simp5_kernel::{Expr, Name};

use crate::app_builder::{mk_app, mk_refl, mk_trans};
use crate::ctx::SimpCtx;
use crate::simplify::SimpError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimpResult {
    new: Expr,
    proof: Option<Expr>,
}

impl SimpResult {
    /// A result with no proof; stands for reflexivity.
    pub fn refl(e: Expr) -> Self {
        SimpResult {
            new: e,
            proof: None,
        }
    }

    /// A result with an explicit proof of `rel old new`.
    pub fn mk(new: Expr, proof: Expr) -> Self {
        SimpResult {
            new,
            proof: Some(proof),
        }
    }

    pub fn new_term(&self) -> &Expr {
        &self.new
    }

    pub fn proof(&self) -> Option<&Expr> {
        self.proof.as_ref()
    }

    pub fn has_proof(&self) -> bool {
        self.proof.is_some()
    }

    /// Refine the term while keeping the proof; only sound when the
    /// replacement is definitionally equal (e.g. after cast elision).
    pub fn update(&mut self, new: Expr) {
        self.new = new;
    }

    pub fn into_parts(self) -> (Expr, Option<Expr>) {
        (self.new, self.proof)
    }
}

/// Compose two results under the active relation: the new term comes from
/// `r2`; proofs compose by transitivity, short-circuiting absent sides.
pub fn join(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    r1: SimpResult,
    r2: SimpResult,
) -> Result<SimpResult, SimpError> {
    let SimpResult {
        new: new2,
        proof: proof2,
    } = r2;
    match (r1.proof, proof2) {
        (None, proof2) => Ok(SimpResult {
            new: new2,
            proof: proof2,
        }),
        (Some(pf1), None) => Ok(SimpResult {
            new: new2,
            proof: Some(pf1),
        }),
        (Some(pf1), Some(pf2)) => {
            let pf = mk_trans(ctx, rel, pf1, pf2)?;
            Ok(SimpResult {
                new: new2,
                proof: Some(pf),
            })
        }
    }
}

/// Materialize a reflexivity proof when absent; used at boundaries where a
/// concrete witness is demanded.
pub fn finalize(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    r: SimpResult,
) -> Result<SimpResult, SimpError> {
    if r.has_proof() {
        return Ok(r);
    }
    let pf = mk_refl(ctx, rel, &r.new)?;
    Ok(SimpResult {
        new: r.new,
        proof: Some(pf),
    })
}

/// Lift an equality result into the active relation through its registered
/// lifting lemma. `None` means no lifting is available.
pub fn lift_from_eq(
    ctx: &mut SimpCtx<'_>,
    rel: &Name,
    r_eq: SimpResult,
) -> Option<SimpResult> {
    let Some(pf) = r_eq.proof else {
        return Some(SimpResult::refl(r_eq.new));
    };
    let from_eq = ctx.env.relation(rel)?.from_eq.clone()?;
    let lifted = mk_app(ctx, &from_eq, &[pf]).ok()?;
    Some(SimpResult {
        new: r_eq.new,
        proof: Some(lifted),
    })
}
