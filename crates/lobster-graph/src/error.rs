//! Error types for lobster-graph.

use thiserror::Error;

/// Errors raised while building or sampling interaction graphs.
#[derive(Debug, Error)]
pub enum Error {
    /// A user id outside `[0, n_users)`.
    #[error("user id {id} out of range (n_users = {n_users})")]
    UserOutOfRange { id: u32, n_users: usize },

    /// An item id outside `[0, n_items)`.
    #[error("item id {id} out of range (n_items = {n_items})")]
    ItemOutOfRange { id: u32, n_items: usize },

    /// Node space does not fit the `u32` index type.
    #[error("node space of {0} nodes exceeds u32 indexing")]
    NodeSpaceTooLarge(usize),

    /// Dropout probability outside `[0, 1)`.
    #[error("dropout must be in [0, 1), got {0}")]
    InvalidDropout(f64),

    /// Weighted sampling rejected the edge weights.
    #[error("weighted edge sampling failed: {0}")]
    Sampling(#[from] rand::distributions::WeightedError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
