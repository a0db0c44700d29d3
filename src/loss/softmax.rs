use std::sync::Arc;

use crate::loss::{std_log, Loss, LossKind};
use crate::matrix::Matrix;
use crate::state::State;

/// Full softmax over every output row.
#[derive(Debug)]
pub struct Softmax {
    wo: Arc<Matrix>,
}

impl Softmax {
    pub fn new(wo: Arc<Matrix>) -> Self {
        Softmax { wo }
    }
}

impl Loss for Softmax {
    fn kind(&self) -> LossKind {
        LossKind::Softmax
    }

    fn output_matrix(&self) -> &Arc<Matrix> {
        &self.wo
    }

    fn forward(
        &self,
        targets: &[usize],
        target_index: usize,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        self.compute_output(state);
        let target = targets[target_index];
        let loss = -std_log(state.output[target]);

        if backprop {
            for i in 0..self.wo.rows() {
                let label = if i == target { 1.0 } else { 0.0 };
                let alpha = lr * (label - state.output[i]);
                state.grad.add_row(&self.wo, i, alpha);
                self.wo.add_vector_to_row(&state.hidden, i, alpha);
            }
        }
        loss
    }

    fn compute_output(&self, state: &mut State) {
        let n = self.wo.rows();
        let mut max = f32::NEG_INFINITY;
        for i in 0..n {
            let z = self.wo.dot_row(&state.hidden, i);
            max = max.max(z);
            state.output.set(i, z);
        }
        let mut z = 0.0;
        for i in 0..n {
            let e = (state.output[i] - max).exp();
            z += e;
            state.output.set(i, e);
        }
        for i in 0..n {
            let p = state.output[i] / z;
            state.output.set(i, p);
        }
    }
}
