//! The LOBSTER recommender: three propagation branches, fused.
//!
//! ```text
//!                        ┌─ identity branch ─┐
//! interactions ─► graph ─┼─ visual branch   ─┼─► [u_id|u_v|u_t], [i_id|i_v|i_t] ─► fusion ─► loss
//!        (edge dropout)  └─ textual branch  ─┘
//! ```
//!
//! All branches share the user id table and the global factor banks; the
//! identity branch also reads the item id table. Training passes use the
//! epoch's masked adjacency (see [`Recommender::pre_epoch_processing`]);
//! inference always uses the full adjacency.

use crate::config::LobsterConfig;
use crate::error::{Error, Result};
use crate::fusion::{full_sort_scores, ModalityFusion, NUM_MODALITIES};
use crate::loss::{LossAssembler, LossBreakdown};
use crate::propagate::{xavier_uniform, GlobalFactors, Modality, ModalityPropagator};
use crate::sparse::AdjacencyTensor;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use lobster_graph::{EdgeSampler, GraphBuilder, InteractionSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Seam between the model and a training / evaluation harness.
pub trait Recommender {
    /// Device the model's tensors live on.
    fn device(&self) -> &Device;

    /// Prepare per-epoch state. Runs once before each epoch's minibatches.
    fn pre_epoch_processing(&mut self) -> Result<()>;

    /// Scalar training loss of one minibatch of triples.
    fn calculate_loss(&self, batch: &TripleBatch) -> Result<Tensor>;

    /// Scores of the given users against every item, `(B, n_items)`.
    fn full_sort_predict(&self, users: &[u32]) -> Result<Tensor>;
}

/// Fixed raw item features of the two content modalities.
#[derive(Debug, Clone)]
pub struct ModalityFeatures {
    /// Visual features (n_items x d_v).
    pub visual: Tensor,
    /// Textual features (n_items x d_t).
    pub textual: Tensor,
}

/// A minibatch of (user, positive item, negative item) index triples.
#[derive(Debug, Clone)]
pub struct TripleBatch {
    pub users: Tensor,
    pub pos_items: Tensor,
    pub neg_items: Tensor,
}

impl TripleBatch {
    /// Upload index slices. All three must have the same length.
    pub fn new(users: &[u32], pos_items: &[u32], neg_items: &[u32], device: &Device) -> Result<Self> {
        for (what, len) in [("positive items", pos_items.len()), ("negative items", neg_items.len())] {
            if len != users.len() {
                return Err(Error::DimensionMismatch {
                    what,
                    expected: users.len(),
                    got: len,
                });
            }
        }
        Ok(Self {
            users: Tensor::from_slice(users, users.len(), device)?,
            pos_items: Tensor::from_slice(pos_items, pos_items.len(), device)?,
            neg_items: Tensor::from_slice(neg_items, neg_items.len(), device)?,
        })
    }

    /// Upload `(user, pos, neg)` triples.
    pub fn from_triples(triples: &[(u32, u32, u32)], device: &Device) -> Result<Self> {
        let users: Vec<u32> = triples.iter().map(|t| t.0).collect();
        let pos: Vec<u32> = triples.iter().map(|t| t.1).collect();
        let neg: Vec<u32> = triples.iter().map(|t| t.2).collect();
        Self::new(&users, &pos, &neg, device)
    }

    pub fn len(&self) -> usize {
        self.users.dims1().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Multimodal graph recommender with edge dropout and imbalance-aware fusion.
pub struct Lobster {
    config: LobsterConfig,
    n_users: usize,
    n_items: usize,
    device: Device,
    user_embedding: Tensor,
    item_embedding: Tensor,
    factors: GlobalFactors,
    branches: [ModalityPropagator; NUM_MODALITIES],
    fusion: ModalityFusion,
    loss: LossAssembler,
    sampler: EdgeSampler,
    full_adj: AdjacencyTensor,
    masked_adj: Option<AdjacencyTensor>,
}

impl Lobster {
    /// Build the model.
    ///
    /// Parameters are created through `vb` under the names `user_embedding`,
    /// `item_embedding`, `factor_u`, `factor_i`, `visual_projection.*` and
    /// `textual_projection.*`.
    ///
    /// # Errors
    /// - [`Error::InvalidConfig`] for out-of-range hyperparameters
    /// - [`Error::DimensionMismatch`] when a feature matrix's row count differs
    ///   from the interaction set's item count
    pub fn new(
        config: LobsterConfig,
        interactions: &InteractionSet,
        features: ModalityFeatures,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let n_users = interactions.n_users();
        let n_items = interactions.n_items();
        let dim = config.embedding_dim;
        let device = vb.device().clone();

        let graph = GraphBuilder::build(interactions);
        let sampler = EdgeSampler::new(&graph, config.dropout, config.seed)?;
        let full_adj = AdjacencyTensor::new(Arc::clone(graph.adjacency()), &device)?;

        let user_embedding =
            vb.get_with_hints((n_users, dim), "user_embedding", xavier_uniform(n_users, dim))?;
        let item_embedding =
            vb.get_with_hints((n_items, dim), "item_embedding", xavier_uniform(n_items, dim))?;
        let factors = GlobalFactors::new(config.factor_num_u, config.factor_num_i, dim, vb.clone())?;

        let branches = [
            ModalityPropagator::identity(item_embedding.clone(), n_users, config.n_layers)?,
            ModalityPropagator::projected(
                Modality::Visual,
                features.visual,
                n_users,
                n_items,
                dim,
                config.n_layers,
                vb.pp("visual_projection"),
            )?,
            ModalityPropagator::projected(
                Modality::Textual,
                features.textual,
                n_users,
                n_items,
                dim,
                config.n_layers,
                vb.pp("textual_projection"),
            )?,
        ];

        info!(
            n_users,
            n_items,
            interactions = interactions.len(),
            embedding_dim = dim,
            dropout = config.dropout,
            n_layers = config.n_layers,
            "built LOBSTER model"
        );

        Ok(Self {
            fusion: ModalityFusion::new(dim),
            loss: LossAssembler::new(config.reg_weight),
            config,
            n_users,
            n_items,
            device,
            user_embedding,
            item_embedding,
            factors,
            branches,
            sampler,
            full_adj,
            masked_adj: None,
        })
    }

    pub fn config(&self) -> &LobsterConfig {
        &self.config
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Raw user id table (n_users x d).
    pub fn user_embedding(&self) -> &Tensor {
        &self.user_embedding
    }

    /// Raw item id table (n_items x d).
    pub fn item_embedding(&self) -> &Tensor {
        &self.item_embedding
    }

    pub fn factors(&self) -> &GlobalFactors {
        &self.factors
    }

    pub fn branch(&self, modality: Modality) -> &ModalityPropagator {
        &self.branches[modality.index()]
    }

    /// The unmasked adjacency used at inference.
    pub fn full_adjacency(&self) -> &AdjacencyTensor {
        &self.full_adj
    }

    /// This epoch's adjacency, once [`Recommender::pre_epoch_processing`] ran.
    pub fn masked_adjacency(&self) -> Option<&AdjacencyTensor> {
        self.masked_adj.as_ref()
    }

    /// Fused embeddings over `adj`: `(n_users x 3d, n_items x 3d)`, slices
    /// in [`Modality::ALL`] order.
    pub fn forward(&self, adj: &AdjacencyTensor) -> Result<(Tensor, Tensor)> {
        let mut users = Vec::with_capacity(NUM_MODALITIES);
        let mut items = Vec::with_capacity(NUM_MODALITIES);
        for branch in &self.branches {
            let (u, i) = branch.forward(adj, &self.user_embedding, &self.factors)?;
            users.push(u);
            items.push(i);
        }
        Ok((Tensor::cat(&users, 1)?, Tensor::cat(&items, 1)?))
    }

    /// Loss terms of one minibatch over the masked adjacency.
    pub fn loss_breakdown(&self, batch: &TripleBatch) -> Result<LossBreakdown> {
        let adj = self.masked_adj.as_ref().ok_or(Error::EpochNotPrepared)?;
        let (user_all, item_all) = self.forward(adj)?;

        let u = user_all.index_select(&batch.users, 0)?;
        let pos = item_all.index_select(&batch.pos_items, 0)?;
        let neg = item_all.index_select(&batch.neg_items, 0)?;
        let (pos_scores, neg_scores) = self.fusion.weighted_scores(&u, &pos, &neg)?;

        let raw_u = self.user_embedding.index_select(&batch.users, 0)?;
        let raw_pos = self.item_embedding.index_select(&batch.pos_items, 0)?;
        let raw_neg = self.item_embedding.index_select(&batch.neg_items, 0)?;
        self.loss
            .assemble(&pos_scores, &neg_scores, [&raw_u, &raw_pos, &raw_neg])
    }
}

impl Recommender for Lobster {
    fn device(&self) -> &Device {
        &self.device
    }

    fn pre_epoch_processing(&mut self) -> Result<()> {
        let strategy = self.sampler.next_strategy();
        let masked = self.sampler.resample()?;
        let masked = if Arc::ptr_eq(&masked, self.full_adj.source()) {
            self.full_adj.clone()
        } else {
            AdjacencyTensor::new(masked, &self.device)?
        };
        debug!(?strategy, nnz = masked.nnz(), "prepared epoch adjacency");
        self.masked_adj = Some(masked);
        Ok(())
    }

    fn calculate_loss(&self, batch: &TripleBatch) -> Result<Tensor> {
        Ok(self.loss_breakdown(batch)?.total)
    }

    fn full_sort_predict(&self, users: &[u32]) -> Result<Tensor> {
        let (user_all, item_all) = self.forward(&self.full_adj)?;
        let ids = Tensor::from_slice(users, users.len(), &self.device)?;
        let u = user_all.index_select(&ids, 0)?;
        full_sort_scores(&u, &item_all)
    }
}
