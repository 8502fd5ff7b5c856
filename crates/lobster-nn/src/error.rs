//! Error types for lobster-nn.

use thiserror::Error;

/// lobster-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Graph construction or sampling error.
    #[error("graph error: {0}")]
    Graph(#[from] lobster_graph::Error),

    /// Dimension mismatch.
    #[error("{what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Training requested before the epoch's masked adjacency was built.
    #[error("masked adjacency not built; call pre_epoch_processing first")]
    EpochNotPrepared,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
