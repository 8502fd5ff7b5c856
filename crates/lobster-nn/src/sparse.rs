//! Device-resident sparse adjacency and sparse × dense products.
//!
//! candle has no sparse tensor type, so the COO triplets of a
//! [`NormalizedAdjacency`] are uploaded as three tensors and the product
//! `A @ X` is expressed as gather + scatter:
//!
//! ```text
//! messages[k] = values[k] * X[cols[k]]        (index_select)
//! out[rows[k]] += messages[k]                 (index_add)
//! ```
//!
//! Both ops are differentiable, so gradients flow back into `X` while the
//! adjacency itself stays constant. Cost per product is O(nnz * d) instead of
//! the O(N² d) a dense matmul would take.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use lobster_graph::NormalizedAdjacency;
use std::sync::Arc;

/// A [`NormalizedAdjacency`] uploaded to a device.
///
/// Cloning is cheap: the tensors and the source matrix are reference counted.
#[derive(Debug, Clone)]
pub struct AdjacencyTensor {
    source: Arc<NormalizedAdjacency>,
    rows: Tensor,
    cols: Tensor,
    values: Tensor,
}

impl AdjacencyTensor {
    /// Upload `adjacency` to `device`.
    pub fn new(adjacency: Arc<NormalizedAdjacency>, device: &Device) -> Result<Self> {
        let nnz = adjacency.nnz();
        let rows = Tensor::from_slice(adjacency.rows(), nnz, device)?;
        let cols = Tensor::from_slice(adjacency.cols(), nnz, device)?;
        let values = Tensor::from_slice(adjacency.values(), (nnz, 1), device)?;
        Ok(Self {
            source: adjacency,
            rows,
            cols,
            values,
        })
    }

    /// The host-side matrix this tensor was built from.
    pub fn source(&self) -> &Arc<NormalizedAdjacency> {
        &self.source
    }

    pub fn n_nodes(&self) -> usize {
        self.source.n_nodes()
    }

    pub fn nnz(&self) -> usize {
        self.source.nnz()
    }

    /// Sparse × dense product `A @ x`.
    ///
    /// # Arguments
    /// - `x`: Node embeddings (N x d)
    ///
    /// # Returns
    /// - Aggregated embeddings (N x d)
    pub fn spmm(&self, x: &Tensor) -> Result<Tensor> {
        let (n, d) = x.dims2()?;
        if n != self.n_nodes() {
            return Err(Error::DimensionMismatch {
                what: "spmm node count",
                expected: self.n_nodes(),
                got: n,
            });
        }

        let out = Tensor::zeros((n, d), x.dtype(), x.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }
        let messages = x
            .index_select(&self.cols, 0)?
            .broadcast_mul(&self.values.to_dtype(x.dtype())?)?;
        Ok(out.index_add(&self.rows, &messages, 0)?)
    }

    /// Dense (N x N) copy on the same device. Intended for small graphs.
    pub fn to_dense(&self) -> Result<Tensor> {
        let n = self.n_nodes();
        Ok(Tensor::from_vec(
            self.source.to_dense(),
            (n, n),
            self.values.device(),
        )?)
    }

    /// Dtype of the stored weights.
    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }
}
