//! Model hyperparameters.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// LOBSTER model configuration.
///
/// Values only; reading them from a file is up to the caller (the type is
/// serde-derived).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LobsterConfig {
    /// Embedding dimension `d` of every modality branch (default: 64).
    pub embedding_dim: usize,
    /// Fraction of interaction edges dropped each epoch, in `[0, 1)` (default: 0.1).
    pub dropout: f64,
    /// Weight of the L2 term in the total loss (default: 1e-4).
    pub reg_weight: f64,
    /// Rows of the user-side global factor bank (default: 4).
    pub factor_num_u: usize,
    /// Rows of the item-side global factor bank (default: 4).
    pub factor_num_i: usize,
    /// Propagation layers per branch (default: 4). Zero keeps only layer 0.
    pub n_layers: usize,
    /// Seed for the edge sampler (default: 42).
    pub seed: u64,
}

impl Default for LobsterConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 64,
            dropout: 0.1,
            reg_weight: 1e-4,
            factor_num_u: 4,
            factor_num_i: 4,
            n_layers: 4,
            seed: 42,
        }
    }
}

impl LobsterConfig {
    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn with_reg_weight(mut self, reg_weight: f64) -> Self {
        self.reg_weight = reg_weight;
        self
    }

    pub fn with_factor_nums(mut self, user: usize, item: usize) -> Self {
        self.factor_num_u = user;
        self.factor_num_i = item;
        self
    }

    pub fn with_layers(mut self, n_layers: usize) -> Self {
        self.n_layers = n_layers;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject values the model cannot be built with.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding_dim must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if self.factor_num_u == 0 || self.factor_num_i == 0 {
            return Err(Error::InvalidConfig(format!(
                "factor bank sizes must be positive, got ({}, {})",
                self.factor_num_u, self.factor_num_i
            )));
        }
        if !self.reg_weight.is_finite() || self.reg_weight < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "reg_weight must be finite and non-negative, got {}",
                self.reg_weight
            )));
        }
        Ok(())
    }
}
