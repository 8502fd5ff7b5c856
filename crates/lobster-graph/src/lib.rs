//! User–item interaction graphs for multimodal recommendation.
//!
//! `lobster-graph` is the structure layer: it turns observed (user, item)
//! interactions into the normalized adjacency a graph recommender propagates
//! over, and owns the per-epoch edge dropout that regularizes training. It has
//! no tensor dependency; `lobster-nn` uploads the matrices it produces.
//!
//! # Node space
//!
//! Users occupy node ids `[0, n_users)` and items occupy
//! `[n_users, n_users + n_items)`. Every matrix in this crate is square over
//! that combined range.
//!
//! # Modules
//!
//! - [`interactions`]: validated, deduplicated interaction sets
//! - [`adjacency`]: symmetric normalization `D^{-1/2} A D^{-1/2}` and the
//!   edge list used as the dropout sampling universe
//! - [`sampling`]: [`EdgeSampler`], the per-epoch masked adjacency
//!
//! # Example
//!
//! ```rust
//! use lobster_graph::{GraphBuilder, InteractionSet, EdgeSampler};
//!
//! let interactions = InteractionSet::new(2, 3, [(0, 0), (0, 2), (1, 1)]).unwrap();
//! let graph = GraphBuilder::build(&interactions);
//! assert_eq!(graph.adjacency().nnz(), 6);
//!
//! let mut sampler = EdgeSampler::new(&graph, 0.5, 7).unwrap();
//! let masked = sampler.resample().unwrap();
//! assert_eq!(masked.nnz(), 2 * sampler.keep_len());
//! ```

pub mod adjacency;
pub mod error;
pub mod interactions;
pub mod sampling;

pub use adjacency::{
    normalize_bipartite, BipartiteGraph, EdgeList, GraphBuilder, NormalizedAdjacency,
    DEGREE_EPSILON,
};
pub use error::{Error, Result};
pub use interactions::InteractionSet;
pub use sampling::{EdgeSampler, SamplingStrategy};
