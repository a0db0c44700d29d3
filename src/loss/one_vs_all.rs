use std::sync::Arc;

use crate::loss::{binary_logistic, compute_sigmoid_output, Loss, LossKind};
use crate::matrix::Matrix;
use crate::state::State;

/// Multi-label loss: every output row is an independent binary classifier.
///
/// Each call visits all rows, so this suits small label sets.
#[derive(Debug)]
pub struct OneVsAll {
    wo: Arc<Matrix>,
}

impl OneVsAll {
    pub fn new(wo: Arc<Matrix>) -> Self {
        OneVsAll { wo }
    }
}

impl Loss for OneVsAll {
    fn kind(&self) -> LossKind {
        LossKind::OneVsAll
    }

    fn output_matrix(&self) -> &Arc<Matrix> {
        &self.wo
    }

    /// Row `i` is a positive example iff `i` is in `targets`. Empty
    /// `targets` makes every row a negative. `target_index` is unused.
    fn forward(
        &self,
        targets: &[usize],
        _target_index: usize,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        let mut loss = 0.0;
        for i in 0..self.wo.rows() {
            let is_match = targets.contains(&i);
            loss += binary_logistic(&self.wo, i, state, is_match, lr, backprop);
        }
        loss
    }

    fn compute_output(&self, state: &mut State) {
        compute_sigmoid_output(&self.wo, state);
    }
}
