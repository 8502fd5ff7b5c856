//! Minimal training loop for [`Recommender`] models.
//!
//! The loop per epoch:
//! 1. `pre_epoch_processing()` (the model resamples its masked adjacency)
//! 2. Shuffle the observed interactions and pair each with one negative item
//!    the user has not interacted with
//! 3. For each minibatch: `calculate_loss`, then one AdamW step
//!
//! Checkpointing and top-K evaluation are the caller's business.
//!
//! # Example
//!
//! ```rust,ignore
//! use lobster_nn::training::{Trainer, TrainingConfig};
//!
//! let config = TrainingConfig::default()
//!     .with_learning_rate(1e-3)
//!     .with_epochs(50);
//!
//! let trainer = Trainer::new(config)?;
//! let report = trainer.fit(&mut model, &interactions, varmap.all_vars())?;
//! ```

use crate::error::{Error, Result};
use crate::model::{Recommender, TripleBatch};
use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use lobster_graph::InteractionSet;
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use tracing::{info, warn};

/// Draws before a user who interacted with nearly every item gets an
/// arbitrary (possibly positive) negative.
const MAX_NEGATIVE_DRAWS: usize = 64;

/// Training configuration.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// AdamW learning rate (default: 0.001).
    pub learning_rate: f64,
    /// Decoupled weight decay (default: 0.0; the model has its own L2 term).
    pub weight_decay: f64,
    /// Number of epochs (default: 10).
    pub epochs: usize,
    /// Triples per minibatch (default: 2048).
    pub batch_size: usize,
    /// Seed for shuffling and negative sampling (default: 42).
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            weight_decay: 0.0,
            epochs: 10,
            batch_size: 2048,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Training results.
#[derive(Debug, Clone, Default)]
pub struct TrainingReport {
    /// Summed minibatch loss per epoch.
    pub loss_history: Vec<f32>,
}

/// Uniform negative sampling over items a user has not interacted with.
pub struct NegativeSampler {
    pairs: Vec<(u32, u32)>,
    positives: Vec<Vec<u32>>,
    n_items: u32,
    rng: XorShiftRng,
}

impl NegativeSampler {
    pub fn new(interactions: &InteractionSet, seed: u64) -> Self {
        Self {
            pairs: interactions.pairs().to_vec(),
            positives: interactions.items_by_user(),
            n_items: interactions.n_items() as u32,
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }

    /// One item `user` has not interacted with, when such an item exists.
    ///
    /// Only called for users of observed pairs, so `user` is in range and
    /// `n_items > 0`.
    fn sample_negative(&mut self, user: u32) -> u32 {
        let seen = &self.positives[user as usize];
        let mut item = self.rng.gen_range(0..self.n_items);
        for _ in 1..MAX_NEGATIVE_DRAWS {
            if seen.binary_search(&item).is_err() {
                break;
            }
            item = self.rng.gen_range(0..self.n_items);
        }
        item
    }

    /// Every interaction once, shuffled, each with a fresh negative.
    pub fn epoch_triples(&mut self) -> Vec<(u32, u32, u32)> {
        let mut pairs = self.pairs.clone();
        pairs.shuffle(&mut self.rng);
        pairs
            .into_iter()
            .map(|(user, pos)| (user, pos, self.sample_negative(user)))
            .collect()
    }
}

/// Drives a [`Recommender`] through epochs of BPR minibatches.
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if config.learning_rate.is_nan() || config.learning_rate <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                config.learning_rate
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train `model` on `interactions`, updating `vars` in place.
    ///
    /// Non-finite minibatch losses are logged and stepped on as-is.
    pub fn fit<M: Recommender>(
        &self,
        model: &mut M,
        interactions: &InteractionSet,
        vars: Vec<Var>,
    ) -> Result<TrainingReport> {
        let mut optimizer = AdamW::new(
            vars,
            ParamsAdamW {
                lr: self.config.learning_rate,
                weight_decay: self.config.weight_decay,
                ..Default::default()
            },
        )?;
        let mut negatives = NegativeSampler::new(interactions, self.config.seed);
        let mut report = TrainingReport::default();

        for epoch in 0..self.config.epochs {
            model.pre_epoch_processing()?;

            let triples = negatives.epoch_triples();
            let mut epoch_loss = 0.0f32;
            for chunk in triples.chunks(self.config.batch_size) {
                let batch = TripleBatch::from_triples(chunk, model.device())?;
                let loss = model.calculate_loss(&batch)?;
                let value = loss.to_scalar::<f32>()?;
                if !value.is_finite() {
                    warn!(epoch, loss = value, "non-finite minibatch loss");
                }
                optimizer.backward_step(&loss)?;
                epoch_loss += value;
            }

            info!(
                epoch,
                loss = epoch_loss,
                batches = triples.len().div_ceil(self.config.batch_size),
                "epoch done"
            );
            report.loss_history.push(epoch_loss);
        }

        Ok(report)
    }
}
