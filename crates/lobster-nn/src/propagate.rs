//! Per-modality graph propagation with similarity-gated layer mixing.
//!
//! Each modality branch (identity, visual, textual) runs the same pipeline
//! over the shared adjacency, differing only in where item features come
//! from:
//!
//! ```text
//! g_u = Σ_f factor_u[f]            g_i = Σ_f factor_i[f]
//! E^(0) = [ users + g_u ; project(items) + g_i ]
//! H^(k+1) = A E^(k)
//! E^(k+1) = cos(H^(k+1), E^(0)) ⊙ H^(k+1)      (row-wise gate)
//! E_final = Σ_{k=0}^{K} E^(k)
//! ```
//!
//! This is LightGCN propagation (no per-layer weights, no activation) with
//! two changes: the layer sum is unweighted, and every propagated layer is
//! gated by how similar each node still is to its own layer-0 (ego)
//! embedding. A node whose neighborhood average points away from its ego
//! embedding gets a negative gate, inverting that layer's contribution.
//!
//! The global factor banks are the same two tensors for every branch. They
//! are handed to [`ModalityPropagator::forward`] on every call rather than
//! stored per branch, so all branches read the same values within a step.

use crate::error::{Error, Result};
use crate::sparse::AdjacencyTensor;
use candle_core::{Tensor, D};
use candle_nn::{linear, Init, Linear, Module, VarBuilder};

/// Denominator floor for cosine similarity.
pub const COSINE_EPS: f64 = 1e-8;

/// The fixed set of modality branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modality {
    /// Trainable item id embeddings.
    Identity,
    /// Pretrained visual features.
    Visual,
    /// Pretrained textual features.
    Textual,
}

impl Modality {
    /// Branch order used in the concatenated embedding.
    pub const ALL: [Modality; 3] = [Modality::Identity, Modality::Visual, Modality::Textual];

    /// Position of this modality's slice in the concatenated embedding.
    pub fn index(self) -> usize {
        match self {
            Modality::Identity => 0,
            Modality::Visual => 1,
            Modality::Textual => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Modality::Identity => "identity",
            Modality::Visual => "visual",
            Modality::Textual => "textual",
        }
    }
}

/// Xavier-uniform initializer for a `(rows, cols)` parameter.
pub(crate) fn xavier_uniform(rows: usize, cols: usize) -> Init {
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

/// Global latent factor banks shared by every modality branch.
///
/// `user` is `(F_u, d)` and `item` is `(F_i, d)`. Only their row sums are
/// used, as an additive bias on every user / item embedding.
#[derive(Debug, Clone)]
pub struct GlobalFactors {
    user: Tensor,
    item: Tensor,
}

impl GlobalFactors {
    /// Create Xavier-uniform factor banks named `factor_u` / `factor_i`.
    pub fn new(factor_num_u: usize, factor_num_i: usize, dim: usize, vb: VarBuilder) -> Result<Self> {
        let user = vb.get_with_hints(
            (factor_num_u, dim),
            "factor_u",
            xavier_uniform(factor_num_u, dim),
        )?;
        let item = vb.get_with_hints(
            (factor_num_i, dim),
            "factor_i",
            xavier_uniform(factor_num_i, dim),
        )?;
        Ok(Self { user, item })
    }

    /// Wrap existing tensors (e.g. loaded weights).
    pub fn from_tensors(user: Tensor, item: Tensor) -> Result<Self> {
        let (_, du) = user.dims2()?;
        let (_, di) = item.dims2()?;
        if du != di {
            return Err(Error::DimensionMismatch {
                what: "factor bank width",
                expected: du,
                got: di,
            });
        }
        Ok(Self { user, item })
    }

    pub fn user(&self) -> &Tensor {
        &self.user
    }

    pub fn item(&self) -> &Tensor {
        &self.item
    }

    /// `g_u`: sum over the user factor rows, shape `(d)`.
    pub fn user_bias(&self) -> Result<Tensor> {
        Ok(self.user.sum(0)?)
    }

    /// `g_i`: sum over the item factor rows, shape `(d)`.
    pub fn item_bias(&self) -> Result<Tensor> {
        Ok(self.item.sum(0)?)
    }
}

/// Where a branch's item-side layer-0 features come from.
enum ItemSource {
    /// Used as-is (identity branch).
    Embedding(Tensor),
    /// Fixed raw features through `tanh(W x + b)`.
    Projected { features: Tensor, projection: Linear },
}

/// Row-wise cosine similarity between two `(N, d)` tensors, shape `(N)`.
///
/// The squared-norm product is floored at `COSINE_EPS²`, so all-zero rows
/// (nodes whose edges were all dropped) give 0 instead of NaN, with finite
/// gradients.
pub fn cosine_similarity(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let dot = (a * b)?.sum(D::Minus1)?;
    let norms = (a.sqr()?.sum(D::Minus1)? * b.sqr()?.sum(D::Minus1)?)?;
    let denom = norms.affine(1.0, COSINE_EPS * COSINE_EPS)?.sqrt()?;
    Ok((dot / denom)?)
}

/// One modality branch.
pub struct ModalityPropagator {
    modality: Modality,
    n_users: usize,
    n_items: usize,
    num_layers: usize,
    items: ItemSource,
}

impl ModalityPropagator {
    /// Identity branch: the trainable item table feeds layer 0 directly.
    ///
    /// # Arguments
    /// - `item_embedding`: Item id table (n_items x d)
    /// - `n_users`: Number of user rows expected in every forward call
    /// - `num_layers`: Propagation layers (K)
    pub fn identity(item_embedding: Tensor, n_users: usize, num_layers: usize) -> Result<Self> {
        let (n_items, _) = item_embedding.dims2()?;
        Ok(Self {
            modality: Modality::Identity,
            n_users,
            n_items,
            num_layers,
            items: ItemSource::Embedding(item_embedding),
        })
    }

    /// Feature branch: fixed item features projected to `dim` through a
    /// linear layer and `tanh`.
    ///
    /// # Arguments
    /// - `modality`: Visual or textual
    /// - `features`: Raw item features (n_items x d_raw), not trained
    /// - `n_users`, `n_items`: Declared node counts
    /// - `dim`: Embedding dimension d
    /// - `num_layers`: Propagation layers (K)
    /// - `vb`: Variable builder for the projection weights
    pub fn projected(
        modality: Modality,
        features: Tensor,
        n_users: usize,
        n_items: usize,
        dim: usize,
        num_layers: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let (rows, raw_dim) = features.dims2()?;
        if rows != n_items {
            return Err(Error::DimensionMismatch {
                what: "feature rows vs item count",
                expected: n_items,
                got: rows,
            });
        }
        if raw_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "{} features have zero width",
                modality.name()
            )));
        }

        let features = features
            .to_device(vb.device())?
            .to_dtype(vb.dtype())?
            .detach();
        let projection = linear(raw_dim, dim, vb)?;

        Ok(Self {
            modality,
            n_users,
            n_items,
            num_layers,
            items: ItemSource::Projected {
                features,
                projection,
            },
        })
    }

    pub fn modality(&self) -> Modality {
        self.modality
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// Item-side features in embedding space, before the global bias.
    pub fn item_features(&self) -> Result<Tensor> {
        match &self.items {
            ItemSource::Embedding(table) => Ok(table.clone()),
            ItemSource::Projected {
                features,
                projection,
            } => Ok(projection.forward(features)?.tanh()?),
        }
    }

    /// Layer-0 (ego) embeddings over the node space, `(n_users + n_items, d)`.
    pub fn ego_embeddings(&self, user_table: &Tensor, factors: &GlobalFactors) -> Result<Tensor> {
        let (rows, _) = user_table.dims2()?;
        if rows != self.n_users {
            return Err(Error::DimensionMismatch {
                what: "user table rows",
                expected: self.n_users,
                got: rows,
            });
        }

        let users = user_table.broadcast_add(&factors.user_bias()?)?;
        let items = self.item_features()?.broadcast_add(&factors.item_bias()?)?;
        Ok(Tensor::cat(&[&users, &items], 0)?)
    }

    /// Every layer snapshot, layer 0 first; `num_layers + 1` tensors.
    pub fn propagate_layers(&self, ego: &Tensor, adj: &AdjacencyTensor) -> Result<Vec<Tensor>> {
        let mut layers = Vec::with_capacity(self.num_layers + 1);
        layers.push(ego.clone());

        let mut current = ego.clone();
        for _ in 0..self.num_layers {
            let propagated = adj.spmm(&current)?;
            let gate = cosine_similarity(&propagated, ego)?;
            current = propagated.broadcast_mul(&gate.unsqueeze(1)?)?;
            layers.push(current.clone());
        }
        Ok(layers)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `adj`: Adjacency for this pass (masked during training, full at inference)
    /// - `user_table`: User id table shared by all branches (n_users x d)
    /// - `factors`: Global factor banks shared by all branches
    ///
    /// # Returns
    /// - `(user_embeddings (n_users x d), item_embeddings (n_items x d))`
    pub fn forward(
        &self,
        adj: &AdjacencyTensor,
        user_table: &Tensor,
        factors: &GlobalFactors,
    ) -> Result<(Tensor, Tensor)> {
        let ego = self.ego_embeddings(user_table, factors)?;
        let layers = self.propagate_layers(&ego, adj)?;

        let mut combined = layers[0].clone();
        for layer in layers.iter().skip(1) {
            combined = (&combined + layer)?;
        }

        let users = combined.narrow(0, 0, self.n_users)?;
        let items = combined.narrow(0, self.n_users, self.n_items)?;
        Ok((users, items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use lobster_graph::{GraphBuilder, InteractionSet};
    use std::sync::Arc;

    fn adjacency(device: &Device) -> AdjacencyTensor {
        let set = InteractionSet::new(3, 4, [(0, 0), (0, 1), (1, 1), (1, 2), (2, 3)]).unwrap();
        AdjacencyTensor::new(Arc::clone(GraphBuilder::build(&set).adjacency()), device).unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        let device = Device::Cpu;
        let a = Tensor::new(&[[1f32, 0.0], [1.0, 1.0], [0.0, 0.0]], &device).unwrap();
        let b = Tensor::new(&[[2f32, 0.0], [-1.0, -1.0], [3.0, 1.0]], &device).unwrap();
        let sim = cosine_similarity(&a, &b).unwrap().to_vec1::<f32>().unwrap();
        assert!((sim[0] - 1.0).abs() < 1e-6);
        assert!((sim[1] + 1.0).abs() < 1e-6);
        assert_eq!(sim[2], 0.0);
    }

    #[test]
    fn test_factor_bias_is_row_sum() {
        let device = Device::Cpu;
        let user = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &device).unwrap();
        let item = Tensor::new(&[[0.5f32, 0.5]], &device).unwrap();
        let factors = GlobalFactors::from_tensors(user, item).unwrap();
        assert_eq!(factors.user_bias().unwrap().to_vec1::<f32>().unwrap(), vec![4.0, 6.0]);
        assert_eq!(factors.item_bias().unwrap().to_vec1::<f32>().unwrap(), vec![0.5, 0.5]);
    }

    #[test]
    fn test_layer_snapshot_count() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let factors = GlobalFactors::new(2, 3, 8, vb.clone()).unwrap();
        let items = Tensor::randn(0f32, 1f32, (4, 8), &device).unwrap();
        let users = Tensor::randn(0f32, 1f32, (3, 8), &device).unwrap();

        let branch = ModalityPropagator::identity(items, 3, 4).unwrap();
        let ego = branch.ego_embeddings(&users, &factors).unwrap();
        let layers = branch.propagate_layers(&ego, &adjacency(&device)).unwrap();
        assert_eq!(layers.len(), 5);
        for layer in &layers {
            assert_eq!(layer.dims(), &[7, 8]);
        }
    }

    #[test]
    fn test_forward_is_sum_of_layers() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let factors = GlobalFactors::new(2, 2, 4, vb.clone()).unwrap();
        let users = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let features = Tensor::randn(0f32, 1f32, (4, 6), &device).unwrap();
        let adj = adjacency(&device);

        let branch =
            ModalityPropagator::projected(Modality::Visual, features, 3, 4, 4, 2, vb.pp("visual"))
                .unwrap();
        let (u, i) = branch.forward(&adj, &users, &factors).unwrap();
        assert_eq!(u.dims(), &[3, 4]);
        assert_eq!(i.dims(), &[4, 4]);

        let ego = branch.ego_embeddings(&users, &factors).unwrap();
        let layers = branch.propagate_layers(&ego, &adj).unwrap();
        let expected = Tensor::stack(&layers, 0).unwrap().sum(0).unwrap();
        let got = Tensor::cat(&[&u, &i], 0).unwrap();
        let diff: f32 = (got - expected)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-5);
    }

    fn host_propagate(adj: &[f32], n: usize, x: &[Vec<f32>]) -> Vec<Vec<f32>> {
        (0..n)
            .map(|r| {
                (0..x[0].len())
                    .map(|c| (0..n).map(|k| adj[r * n + k] * x[k][c]).sum::<f32>())
                    .collect()
            })
            .collect()
    }

    fn host_gate(propagated: &[Vec<f32>], reference: &[Vec<f32>]) -> Vec<Vec<f32>> {
        propagated
            .iter()
            .zip(reference)
            .map(|(p, e)| {
                let dot: f32 = p.iter().zip(e).map(|(a, b)| a * b).sum();
                let np: f32 = p.iter().map(|a| a * a).sum();
                let ne: f32 = e.iter().map(|a| a * a).sum();
                let cos = dot / (np * ne).sqrt();
                p.iter().map(|a| a * cos).collect()
            })
            .collect()
    }

    fn assert_close(got: &Tensor, expected: &[Vec<f32>]) {
        for (g, e) in got.to_vec2::<f32>().unwrap().iter().flatten().zip(expected.iter().flatten()) {
            assert!((g - e).abs() < 1e-5, "{g} vs {e}");
        }
    }

    #[test]
    fn test_layers_are_gated_by_ego_similarity() {
        let device = Device::Cpu;
        let set = InteractionSet::new(2, 2, [(0, 0), (1, 0), (1, 1)]).unwrap();
        let source = Arc::clone(GraphBuilder::build(&set).adjacency());
        let dense = source.to_dense();
        let adj = AdjacencyTensor::new(source, &device).unwrap();

        let ego_rows = vec![
            vec![1f32, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.5],
            vec![0.5, 1.0],
        ];
        let ego = Tensor::new(&[[1f32, 0.0], [0.0, 1.0], [-1.0, 0.5], [0.5, 1.0]], &device).unwrap();
        let items = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        let branch = ModalityPropagator::identity(items, 2, 2).unwrap();
        let layers = branch.propagate_layers(&ego, &adj).unwrap();

        let first = host_propagate(&dense, 4, &ego_rows);
        let layer1 = host_gate(&first, &ego_rows);
        assert_close(&layers[1], &layer1);

        // user 0 only sees item 0, which points away from it: the gate flips the row
        let gated = layers[1].to_vec2::<f32>().unwrap();
        let inverted: f32 = gated[0]
            .iter().zip(&first[0]).map(|(a, b)| a * b).sum();
        assert!(inverted < 0.0);

        // deeper layers still compare against layer 0, not the previous layer
        let second = host_propagate(&dense, 4, &layer1);
        assert_close(&layers[2], &host_gate(&second, &ego_rows));
        let against_previous = host_gate(&second, &layer1);
        let gap: f32 = layers[2]
            .to_vec2::<f32>()
            .unwrap()
            .iter()
            .flatten()
            .zip(against_previous.iter().flatten())
            .map(|(a, b)| (a - b).abs())
            .sum();
        assert!(gap > 1e-2);
    }

    #[test]
    fn test_zero_layers_returns_ego() {
        let device = Device::Cpu;
        let user = Tensor::zeros((1, 2), DType::F32, &device).unwrap();
        let item = Tensor::zeros((1, 2), DType::F32, &device).unwrap();
        let factors = GlobalFactors::from_tensors(user, item).unwrap();
        let users = Tensor::new(&[[1f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &device).unwrap();
        let items = Tensor::ones((4, 2), DType::F32, &device).unwrap();

        let branch = ModalityPropagator::identity(items, 3, 0).unwrap();
        let (u, i) = branch.forward(&adjacency(&device), &users, &factors).unwrap();
        assert_eq!(u.to_vec2::<f32>().unwrap(), users.to_vec2::<f32>().unwrap());
        assert_eq!(i.to_vec2::<f32>().unwrap(), vec![vec![1.0, 1.0]; 4]);
    }

    #[test]
    fn test_feature_row_mismatch_rejected() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let features = Tensor::zeros((5, 6), DType::F32, &device).unwrap();
        let result =
            ModalityPropagator::projected(Modality::Textual, features, 3, 4, 8, 4, vb);
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 4, got: 5, .. })
        ));
    }

    #[test]
    fn test_projected_features_are_bounded() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let features = (Tensor::randn(0f32, 1f32, (4, 16), &device).unwrap() * 100.0).unwrap();
        let branch =
            ModalityPropagator::projected(Modality::Visual, features, 3, 4, 8, 4, vb).unwrap();
        let projected = branch.item_features().unwrap();
        let max: f32 = projected.abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(max <= 1.0);
    }
}
