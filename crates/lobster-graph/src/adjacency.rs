//! Symmetric normalization of the user–item bipartite graph.
//!
//! The propagation layers average neighborhoods through
//!
//! ```text
//! L = D^{-1/2} A D^{-1/2}
//! ```
//!
//! where `A` is the unweighted adjacency over the combined node space (every
//! interaction mirrored as `(u, n_users + i)` and `(n_users + i, u)`) and `D`
//! holds node degrees. Each nonzero entry becomes `1 / sqrt(deg(i) * deg(j))`.
//!
//! Degrees carry a small [`DEGREE_EPSILON`] so isolated nodes get a finite
//! (tiny) weight instead of a division by zero.
//!
//! The same formula, evaluated over just the `n_users x n_items` half, yields
//! the base weight of every interaction edge. Those weights are the sampling
//! universe for [`crate::EdgeSampler`].

use crate::interactions::InteractionSet;
use std::sync::Arc;

/// Added to every degree before the inverse square root.
pub const DEGREE_EPSILON: f64 = 1e-7;

fn inv_sqrt_degree(degree: u32) -> f64 {
    (degree as f64 + DEGREE_EPSILON).powf(-0.5)
}

/// Sparse symmetric-normalized adjacency over the user + item node space.
///
/// Stored as COO triplets sorted by `(row, col)`. Rows and columns are node
/// ids; users come first, then items.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAdjacency {
    n_nodes: usize,
    rows: Vec<u32>,
    cols: Vec<u32>,
    values: Vec<f32>,
}

impl NormalizedAdjacency {
    /// Build the full normalized adjacency from an interaction set.
    ///
    /// Degrees are counted over the whole symmetric matrix: the number of
    /// nonzero entries in each node's row.
    pub fn build(interactions: &InteractionSet) -> Self {
        let n_users = interactions.n_users() as u32;
        let mut degree = vec![0u32; interactions.n_nodes()];
        for &(user, item) in interactions.pairs() {
            degree[user as usize] += 1;
            degree[(n_users + item) as usize] += 1;
        }
        let d_inv_sqrt: Vec<f64> = degree.iter().map(|&d| inv_sqrt_degree(d)).collect();

        let mut entries = Vec::with_capacity(2 * interactions.len());
        for &(user, item) in interactions.pairs() {
            let item_node = n_users + item;
            let value = (d_inv_sqrt[user as usize] * d_inv_sqrt[item_node as usize]) as f32;
            entries.push((user, item_node, value));
            entries.push((item_node, user, value));
        }

        Self::from_entries(interactions.n_nodes(), entries)
    }

    /// Mirror weighted bipartite edges into a symmetric node-space matrix.
    ///
    /// `edges[k] = (user, item)` carries `weights[k]`; the weight lands at
    /// both `(user, n_users + item)` and `(n_users + item, user)`.
    pub fn from_bipartite(
        n_users: usize,
        n_items: usize,
        edges: &[(u32, u32)],
        weights: &[f32],
    ) -> Self {
        debug_assert_eq!(edges.len(), weights.len());
        let offset = n_users as u32;
        let mut entries = Vec::with_capacity(2 * edges.len());
        for (&(user, item), &w) in edges.iter().zip(weights) {
            entries.push((user, offset + item, w));
            entries.push((offset + item, user, w));
        }
        Self::from_entries(n_users + n_items, entries)
    }

    fn from_entries(n_nodes: usize, mut entries: Vec<(u32, u32, f32)>) -> Self {
        entries.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut rows = Vec::with_capacity(entries.len());
        let mut cols = Vec::with_capacity(entries.len());
        let mut values = Vec::with_capacity(entries.len());
        for (r, c, v) in entries {
            rows.push(r);
            cols.push(c);
            values.push(v);
        }

        Self {
            n_nodes,
            rows,
            cols,
            values,
        }
    }

    /// Matrix dimension (`n_users + n_items`).
    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Number of stored (nonzero) entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn cols(&self) -> &[u32] {
        &self.cols
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Entry at `(row, col)`, or `None` when it is structurally zero.
    pub fn get(&self, row: u32, col: u32) -> Option<f32> {
        let start = self.rows.partition_point(|&r| r < row);
        let end = self.rows.partition_point(|&r| r <= row);
        self.cols[start..end]
            .binary_search(&col)
            .ok()
            .map(|k| self.values[start + k])
    }

    /// Iterate `(row, col, value)` triplets in `(row, col)` order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&r, &c), &v)| (r, c, v))
    }

    /// Row-major dense copy. Intended for small graphs and tests.
    pub fn to_dense(&self) -> Vec<f32> {
        let mut dense = vec![0.0; self.n_nodes * self.n_nodes];
        for (r, c, v) in self.iter() {
            dense[r as usize * self.n_nodes + c as usize] = v;
        }
        dense
    }

    /// Whether every entry `(i, j)` has an equal `(j, i)` counterpart.
    pub fn is_symmetric(&self) -> bool {
        self.iter()
            .all(|(r, c, v)| self.get(c, r).is_some_and(|t| t == v))
    }
}

/// Compute symmetric normalization weights over a bipartite edge subset.
///
/// The subset is treated as the whole graph: user degree is the number of
/// listed edges touching that user (row sum of the `n_users x n_items`
/// matrix), item degree likewise (column sum). Returns one weight per edge,
/// in input order.
pub fn normalize_bipartite(edges: &[(u32, u32)], n_users: usize, n_items: usize) -> Vec<f32> {
    let mut user_degree = vec![0u32; n_users];
    let mut item_degree = vec![0u32; n_items];
    for &(user, item) in edges {
        user_degree[user as usize] += 1;
        item_degree[item as usize] += 1;
    }

    edges
        .iter()
        .map(|&(user, item)| {
            let w = inv_sqrt_degree(user_degree[user as usize])
                * inv_sqrt_degree(item_degree[item as usize]);
            w as f32
        })
        .collect()
}

/// Interaction edges with their base normalization weights.
///
/// This is the universe the per-epoch dropout samples from.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeList {
    n_users: usize,
    n_items: usize,
    edges: Vec<(u32, u32)>,
    weights: Vec<f32>,
}

impl EdgeList {
    /// Derive the edge list from the bipartite half of the graph.
    pub fn from_interactions(interactions: &InteractionSet) -> Self {
        let edges = interactions.pairs().to_vec();
        let weights = normalize_bipartite(&edges, interactions.n_users(), interactions.n_items());
        Self {
            n_users: interactions.n_users(),
            n_items: interactions.n_items(),
            edges,
            weights,
        }
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// `(user, item)` pairs, parallel to [`Self::weights`].
    pub fn edges(&self) -> &[(u32, u32)] {
        &self.edges
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// The full normalized adjacency together with the dropout edge list.
#[derive(Debug, Clone)]
pub struct BipartiteGraph {
    adjacency: Arc<NormalizedAdjacency>,
    edges: EdgeList,
}

impl BipartiteGraph {
    /// Full (unmasked) adjacency, shared with samplers and inference.
    pub fn adjacency(&self) -> &Arc<NormalizedAdjacency> {
        &self.adjacency
    }

    pub fn edges(&self) -> &EdgeList {
        &self.edges
    }

    pub fn n_users(&self) -> usize {
        self.edges.n_users
    }

    pub fn n_items(&self) -> usize {
        self.edges.n_items
    }

    pub fn n_nodes(&self) -> usize {
        self.adjacency.n_nodes()
    }
}

/// Builds [`BipartiteGraph`]s from interaction sets.
pub struct GraphBuilder;

impl GraphBuilder {
    /// Construct the normalized adjacency and edge list. Pure and
    /// deterministic: equal interaction sets give bit-identical output.
    pub fn build(interactions: &InteractionSet) -> BipartiteGraph {
        BipartiteGraph {
            adjacency: Arc::new(NormalizedAdjacency::build(interactions)),
            edges: EdgeList::from_interactions(interactions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star() -> InteractionSet {
        // user 0 -> items 0, 1, 2; user 1 -> item 2
        InteractionSet::new(2, 3, [(0, 0), (0, 1), (0, 2), (1, 2)]).unwrap()
    }

    #[test]
    fn test_mirrored_entries() {
        let adj = NormalizedAdjacency::build(&star());
        assert_eq!(adj.n_nodes(), 5);
        assert_eq!(adj.nnz(), 8);
        assert!(adj.get(0, 2).is_some());
        assert!(adj.get(2, 0).is_some());
        assert!(adj.get(0, 1).is_none());
        assert!(adj.is_symmetric());
    }

    #[test]
    fn test_normalized_values() {
        let adj = NormalizedAdjacency::build(&star());
        // user 0 has degree 3, item 2 (node 4) has degree 2
        let expected = 1.0 / (3.0f32 * 2.0).sqrt();
        let got = adj.get(0, 4).unwrap();
        assert!((got - expected).abs() < 1e-6, "{got} vs {expected}");
        // user 1 (degree 1) to item 2 (degree 2)
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((adj.get(1, 4).unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_degree_one_graph_is_unit() {
        let set = InteractionSet::new(3, 3, [(0, 0), (1, 1), (2, 2)]).unwrap();
        let adj = NormalizedAdjacency::build(&set);
        for (_, _, v) in adj.iter() {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sorted_coo() {
        let adj = NormalizedAdjacency::build(&star());
        let keys: Vec<_> = adj.iter().map(|(r, c, _)| (r, c)).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_edge_weights_match_full_adjacency() {
        let set = star();
        let adj = NormalizedAdjacency::build(&set);
        let edges = EdgeList::from_interactions(&set);
        for (&(u, i), &w) in edges.edges().iter().zip(edges.weights()) {
            let full = adj.get(u, set.item_node(i)).unwrap();
            assert!((w - full).abs() < 1e-6);
        }
    }

    #[test]
    fn test_isolated_nodes_stay_empty() {
        // user 1 and item 1 never interact
        let set = InteractionSet::new(2, 2, [(0, 0)]).unwrap();
        let adj = NormalizedAdjacency::build(&set);
        assert_eq!(adj.nnz(), 2);
        let dense = adj.to_dense();
        assert_eq!(dense.len(), 16);
        assert!(dense[4..8].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_build_is_deterministic() {
        let a = GraphBuilder::build(&star());
        let b = GraphBuilder::build(&star());
        assert_eq!(*a.adjacency(), *b.adjacency());
        assert_eq!(a.edges(), b.edges());
    }
}
