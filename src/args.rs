use serde::{Deserialize, Serialize};

use crate::loss::LossKind;

/// Parameters for building a fresh [`Model`](crate::Model).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArgs {
    /// Embedding dimension (width of both matrices).
    pub dim: usize,

    pub loss: LossKind,

    /// Negatives sampled per example; only used by negative sampling.
    pub neg: usize,

    /// Divide the gradient by the number of input features before applying it.
    pub normalize_gradient: bool,

    /// Seed for input matrix initialization.
    pub seed: u64,

    /// Guard matrix rows with this many sharded locks. `None` (the default)
    /// trains lock-free.
    pub row_lock_shards: Option<usize>,
}

impl Default for ModelArgs {
    fn default() -> Self {
        ModelArgs {
            dim: 100,
            loss: LossKind::Softmax,
            neg: 5,
            normalize_gradient: true,
            seed: 0,
            row_lock_shards: None,
        }
    }
}
