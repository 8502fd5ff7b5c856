//! Multimodal graph propagation, fusion and ranking loss on candle.
//!
//! `lobster-nn` implements the LOBSTER recommender on top of the graphs built
//! by `lobster-graph`: three propagation branches (item ids, visual features,
//! textual features) over one user–item adjacency, fused with weights that
//! favor whichever modality currently ranks a training pair worst.
//!
//! # Modules
//!
//! - [`sparse`]: device-resident adjacency and sparse × dense products
//! - [`propagate`]: per-modality propagation with similarity-gated layers
//! - [`fusion`]: imbalance-aware modality weighting and scoring
//! - [`loss`]: BPR + L2 objective
//! - [`model`]: the [`Lobster`] model and the [`Recommender`] harness seam
//! - [`training`]: a minimal AdamW training loop
//! - [`config`]: hyperparameters
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use lobster_graph::InteractionSet;
//! use lobster_nn::{Lobster, LobsterConfig, ModalityFeatures, Recommender};
//!
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let interactions = InteractionSet::new(n_users, n_items, pairs)?;
//! let features = ModalityFeatures { visual: v_feat, textual: t_feat };
//! let mut model = Lobster::new(LobsterConfig::default(), &interactions, features, vb)?;
//!
//! model.pre_epoch_processing()?;
//! let loss = model.calculate_loss(&batch)?;
//! let scores = model.full_sort_predict(&[0, 1, 2])?;  // (3, n_items)
//! ```

pub mod config;
pub mod error;
pub mod fusion;
pub mod loss;
pub mod model;
pub mod propagate;
pub mod sparse;
pub mod training;

pub use config::LobsterConfig;
pub use error::{Error, Result};
pub use fusion::{full_sort_scores, ModalityFusion, NUM_MODALITIES};
pub use loss::{bpr_loss, l2_loss, LossAssembler, LossBreakdown};
pub use model::{Lobster, ModalityFeatures, Recommender, TripleBatch};
pub use propagate::{cosine_similarity, GlobalFactors, Modality, ModalityPropagator};
pub use sparse::AdjacencyTensor;
pub use training::{NegativeSampler, Trainer, TrainingConfig, TrainingReport};
