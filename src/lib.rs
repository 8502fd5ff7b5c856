//! `lobster` is a multimodal graph recommender.
//!
//! It learns user and item representations from a user–item interaction
//! graph plus fixed visual and textual item features, and scores user–item
//! affinity for ranking.
//!
//! The workspace splits into two layers:
//!
//! - [`graph`] (`lobster-graph`): interaction sets, symmetric normalized
//!   adjacency, per-epoch edge dropout. No tensor dependency.
//! - [`nn`] (`lobster-nn`): candle model: per-modality propagation,
//!   imbalance-aware fusion, BPR loss, training loop.

pub use lobster_graph as graph;
pub use lobster_nn as nn;

pub use lobster_graph::{EdgeSampler, GraphBuilder, InteractionSet, NormalizedAdjacency};
pub use lobster_nn::{
    Lobster, LobsterConfig, ModalityFeatures, Recommender, Trainer, TrainingConfig, TripleBatch,
};
