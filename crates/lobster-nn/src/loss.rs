//! Training objective: fusion-weighted BPR plus L2 on raw id embeddings.
//!
//! ```text
//! L = -Σ_b log σ(pos_b - neg_b)  +  λ · ½ Σ ||e||²
//! ```
//!
//! The ranking term is summed over the batch, not averaged, so its magnitude
//! grows with batch size. The L2 term covers only the identity-table rows of
//! the sampled users, positive items and negative items, taken before any
//! propagation.

use crate::error::Result;
use candle_core::Tensor;

/// Bayesian personalized ranking loss, `-Σ log σ(pos - neg)`.
///
/// Evaluated as `Σ softplus(neg - pos)` in the overflow-free form
/// `relu(-x) + ln(1 + e^{-|x|})`.
pub fn bpr_loss(pos_scores: &Tensor, neg_scores: &Tensor) -> Result<Tensor> {
    let diff = (pos_scores - neg_scores)?;
    let tail = ((diff.abs()?.neg()?.exp()? + 1.0)?).log()?;
    let softplus = (diff.neg()?.relu()? + tail)?;
    Ok(softplus.sum_all()?)
}

/// `½ Σ ||e||²` over every given embedding block.
pub fn l2_loss(embeddings: &[&Tensor]) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for e in embeddings {
        let sq = e.sqr()?.sum_all()?;
        total = Some(match total {
            Some(t) => (t + sq)?,
            None => sq,
        });
    }
    match total {
        Some(t) => Ok((t * 0.5)?),
        None => Err(crate::Error::InvalidConfig(
            "l2_loss needs at least one embedding block".into(),
        )),
    }
}

/// Loss terms of one minibatch.
#[derive(Debug, Clone)]
pub struct LossBreakdown {
    /// `ranking + reg_weight * regularization`; call `backward` on this.
    pub total: Tensor,
    pub ranking: Tensor,
    pub regularization: Tensor,
}

/// Combines the ranking and regularization terms.
#[derive(Debug, Clone, Copy)]
pub struct LossAssembler {
    reg_weight: f64,
}

impl LossAssembler {
    pub fn new(reg_weight: f64) -> Self {
        Self { reg_weight }
    }

    pub fn reg_weight(&self) -> f64 {
        self.reg_weight
    }

    /// Assemble the total loss.
    ///
    /// # Arguments
    /// - `pos_scores`, `neg_scores`: fusion-weighted scores (B)
    /// - `raw`: identity-table rows of users, positive items, negative items
    pub fn assemble(
        &self,
        pos_scores: &Tensor,
        neg_scores: &Tensor,
        raw: [&Tensor; 3],
    ) -> Result<LossBreakdown> {
        let ranking = bpr_loss(pos_scores, neg_scores)?;
        let regularization = l2_loss(&raw)?;
        let total = (&ranking + (&regularization * self.reg_weight)?)?;
        Ok(LossBreakdown {
            total,
            ranking,
            regularization,
        })
    }
}
