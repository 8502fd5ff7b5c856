//! Imbalance-aware modality fusion.
//!
//! User and item embeddings are the concatenation of the three branch
//! outputs, `[identity | visual | textual]`, each `d` wide. For a training
//! triple (u, i⁺, i⁻) every modality m has its own ranking margin
//!
//! ```text
//! margin_m = <u_m, i⁺_m> - <u_m, i⁻_m>
//! ```
//!
//! and the fusion weight is
//!
//! ```text
//! w_m = 1 - softmax_m(margin)
//! ```
//!
//! The modality that currently separates the pair worst gets the largest
//! weight, so a strong modality cannot carry the whole objective while a weak
//! one stops learning (the "shortest stave" of the barrel decides the
//! capacity). The weight is computed on detached margins: it scales the
//! scores but no gradient flows through it.
//!
//! At inference there is no negative item, so scoring is a plain dot product
//! over the concatenated embedding with all modalities weighted equally.

use crate::error::{Error, Result};
use crate::propagate::Modality;
use candle_core::{Tensor, D};

/// Number of modality branches fused.
pub const NUM_MODALITIES: usize = Modality::ALL.len();

/// Fuses per-modality scores for pairwise ranking.
#[derive(Debug, Clone, Copy)]
pub struct ModalityFusion {
    emb_size: usize,
}

impl ModalityFusion {
    /// `emb_size` is the width `d` of one modality slice.
    pub fn new(emb_size: usize) -> Self {
        Self { emb_size }
    }

    pub fn emb_size(&self) -> usize {
        self.emb_size
    }

    fn check_width(&self, x: &Tensor) -> Result<usize> {
        let (batch, width) = x.dims2()?;
        let expected = NUM_MODALITIES * self.emb_size;
        if width != expected {
            return Err(Error::DimensionMismatch {
                what: "fused embedding width",
                expected,
                got: width,
            });
        }
        Ok(batch)
    }

    /// Per-modality dot products `<a_m, b_m>`, shape `(B, 3)`.
    pub fn modality_scores(&self, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        let batch = self.check_width(a)?;
        self.check_width(b)?;
        Ok((a * b)?
            .reshape((batch, NUM_MODALITIES, self.emb_size))?
            .sum(D::Minus1)?)
    }

    /// Fusion indicator `1 - softmax(margin)` per sample and modality,
    /// shape `(B, 3)`. Outside the gradient graph; rows sum to 2.
    pub fn modality_indicator(&self, user: &Tensor, pos: &Tensor, neg: &Tensor) -> Result<Tensor> {
        let margins =
            (self.modality_scores(user, pos)? - self.modality_scores(user, neg)?)?.detach();
        let softmax = candle_nn::ops::softmax(&margins, D::Minus1)?;
        Ok(softmax.affine(-1.0, 1.0)?)
    }

    /// Indicator broadcast over each modality's `d` dims, shape `(B, 3d)`.
    pub fn modality_weights(&self, user: &Tensor, pos: &Tensor, neg: &Tensor) -> Result<Tensor> {
        let indicator = self.modality_indicator(user, pos, neg)?;
        let batch = indicator.dim(0)?;
        Ok(indicator
            .unsqueeze(2)?
            .broadcast_as((batch, NUM_MODALITIES, self.emb_size))?
            .contiguous()?
            .reshape((batch, NUM_MODALITIES * self.emb_size))?)
    }

    /// Fusion-weighted positive and negative scores, each shape `(B)`.
    ///
    /// # Arguments
    /// - `user`: Fused user embeddings of the batch (B x 3d)
    /// - `pos`: Fused positive item embeddings (B x 3d)
    /// - `neg`: Fused negative item embeddings (B x 3d)
    pub fn weighted_scores(
        &self,
        user: &Tensor,
        pos: &Tensor,
        neg: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let weights = self.modality_weights(user, pos, neg)?;
        let pos_scores = (user * pos)?.mul(&weights)?.sum(D::Minus1)?;
        let neg_scores = (user * neg)?.mul(&weights)?.sum(D::Minus1)?;
        Ok((pos_scores, neg_scores))
    }
}

/// Equal-weight scores of every user in `users` against every item,
/// shape `(B, n_items)`.
pub fn full_sort_scores(users: &Tensor, items: &Tensor) -> Result<Tensor> {
    Ok(users.matmul(&items.t()?)?)
}
