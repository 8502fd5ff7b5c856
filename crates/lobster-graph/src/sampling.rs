//! Per-epoch edge dropout over the interaction graph.
//!
//! Each training epoch keeps `floor(E * (1 - dropout))` of the `E`
//! interaction edges and renormalizes over the survivors, so degrees reflect
//! the subgraph actually propagated over that epoch.
//!
//! Two selection strategies alternate between epochs, starting with
//! [`SamplingStrategy::Weighted`]:
//!
//! | Strategy | Draw (without replacement) |
//! |----------|----------------------------|
//! | `Weighted` | probability proportional to the edge's base normalization weight |
//! | `Uniform` | every edge equally likely |
//!
//! Weighted epochs favor edges between low-degree endpoints; uniform epochs
//! are plain structural dropout.
//!
//! With `dropout == 0` the sampler hands back the full adjacency itself (the
//! same `Arc`) and never draws.

use crate::adjacency::{normalize_bipartite, BipartiteGraph, EdgeList, NormalizedAdjacency};
use crate::error::{Error, Result};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use std::sync::Arc;
use tracing::debug;

/// Edge selection policy for one resampling call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingStrategy {
    /// Proportional to base normalization weight.
    Weighted,
    /// Uniform over edges.
    Uniform,
}

/// Epoch-scoped owner of the masked adjacency.
///
/// Call [`EdgeSampler::resample`] exactly once per epoch, before any forward
/// pass of that epoch. The strategy toggle advances on every call that
/// actually drops edges.
pub struct EdgeSampler {
    edges: EdgeList,
    full: Arc<NormalizedAdjacency>,
    dropout: f64,
    keep_len: usize,
    uniform_next: bool,
    rng: XorShiftRng,
}

impl EdgeSampler {
    /// Create a sampler over `graph`'s edge list.
    ///
    /// # Arguments
    /// - `graph`: full adjacency and edge list
    /// - `dropout`: fraction of edges dropped each epoch, in `[0, 1)`
    /// - `seed`: random seed for reproducibility
    pub fn new(graph: &BipartiteGraph, dropout: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&dropout) {
            return Err(Error::InvalidDropout(dropout));
        }
        let keep_len = (graph.edges().len() as f64 * (1.0 - dropout)).floor() as usize;

        Ok(Self {
            edges: graph.edges().clone(),
            full: Arc::clone(graph.adjacency()),
            dropout,
            keep_len,
            uniform_next: false,
            rng: XorShiftRng::seed_from_u64(seed),
        })
    }

    pub fn dropout(&self) -> f64 {
        self.dropout
    }

    /// Edges retained per epoch.
    pub fn keep_len(&self) -> usize {
        self.keep_len
    }

    /// The unmasked adjacency.
    pub fn full(&self) -> &Arc<NormalizedAdjacency> {
        &self.full
    }

    /// Strategy the next [`Self::resample`] call will use; `None` when
    /// dropout is disabled.
    pub fn next_strategy(&self) -> Option<SamplingStrategy> {
        if self.dropout == 0.0 {
            None
        } else if self.uniform_next {
            Some(SamplingStrategy::Uniform)
        } else {
            Some(SamplingStrategy::Weighted)
        }
    }

    /// Build the masked adjacency for a new epoch.
    pub fn resample(&mut self) -> Result<Arc<NormalizedAdjacency>> {
        let Some(strategy) = self.next_strategy() else {
            return Ok(Arc::clone(&self.full));
        };
        self.uniform_next = !self.uniform_next;

        let keep_idx = self.sample_indices(strategy)?;
        let kept: Vec<(u32, u32)> = keep_idx.iter().map(|&k| self.edges.edges()[k]).collect();
        let weights = normalize_bipartite(&kept, self.edges.n_users(), self.edges.n_items());

        debug!(
            ?strategy,
            kept = kept.len(),
            total = self.edges.len(),
            "resampled interaction edges"
        );

        Ok(Arc::new(NormalizedAdjacency::from_bipartite(
            self.edges.n_users(),
            self.edges.n_items(),
            &kept,
            &weights,
        )))
    }

    fn sample_indices(&mut self, strategy: SamplingStrategy) -> Result<Vec<usize>> {
        let total = self.edges.len();
        if self.keep_len == 0 {
            return Ok(Vec::new());
        }

        match strategy {
            SamplingStrategy::Uniform => {
                Ok(rand::seq::index::sample(&mut self.rng, total, self.keep_len).into_vec())
            }
            SamplingStrategy::Weighted => {
                let weights = self.edges.weights();
                let candidates: Vec<usize> = (0..total).collect();
                let chosen = candidates.choose_multiple_weighted(
                    &mut self.rng,
                    self.keep_len,
                    |&k| weights[k] as f64,
                )?;
                Ok(chosen.copied().collect())
            }
        }
    }
}
