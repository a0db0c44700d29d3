//! Everything needed to rebuild a [`Model`], as plain data.
//!
//! Writing a snapshot somewhere durable is up to the caller.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loss::{self, LossKind};
use crate::matrix::Matrix;
use crate::model::Model;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixData {
    pub rows: usize,
    pub cols: usize,
    /// Row-major, `rows * cols` entries.
    pub data: Vec<f32>,
}

impl MatrixData {
    fn capture(m: &Matrix) -> Self {
        MatrixData {
            rows: m.rows(),
            cols: m.cols(),
            data: m.to_vec(),
        }
    }

    fn restore(&self) -> Result<Matrix> {
        Matrix::from_vec(self.rows, self.cols, self.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    /// Width of both matrices.
    pub dim: usize,
    pub input: MatrixData,
    pub output: MatrixData,
    pub loss: LossKind,
    pub neg: usize,
    /// Per-label counts, for the losses that are built from them.
    pub label_counts: Vec<u64>,
    pub normalize_gradient: bool,
}

impl ModelSnapshot {
    /// Encode with `bincode`.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl Model {
    /// Copy out the current parameters.
    ///
    /// Under concurrent training this is not a consistent cut: rows being
    /// updated while the snapshot is taken may be half old, half new.
    pub fn snapshot(&self) -> ModelSnapshot {
        ModelSnapshot {
            dim: self.dim(),
            input: MatrixData::capture(self.input_matrix()),
            output: MatrixData::capture(self.output_matrix()),
            loss: self.loss_kind(),
            neg: self.loss().neg(),
            label_counts: self.loss().label_counts().to_vec(),
            normalize_gradient: self.normalize_gradient(),
        }
    }

    /// Rebuild a model that behaves exactly like the one `snapshot` was taken
    /// from. The rebuilt matrices have no row locks.
    pub fn from_snapshot(snapshot: &ModelSnapshot) -> Result<Model> {
        for (what, m) in [("input width", &snapshot.input), ("output width", &snapshot.output)] {
            if m.cols != snapshot.dim {
                return Err(Error::ShapeMismatch {
                    what,
                    got: m.cols,
                    expected: snapshot.dim,
                });
            }
        }
        let wi = Arc::new(snapshot.input.restore()?);
        let wo = Arc::new(snapshot.output.restore()?);
        let loss = loss::build(snapshot.loss, wo.clone(), &snapshot.label_counts, snapshot.neg)?;
        Model::new(wi, wo, loss, snapshot.normalize_gradient)
    }
}
