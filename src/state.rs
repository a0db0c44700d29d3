use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::vector::Vector;

/// Per-worker scratch space and training metrics.
///
/// Each thread that calls [`Model::predict`](crate::Model::predict) or
/// [`Model::update`](crate::Model::update) owns exactly one `State`. It is
/// never shared. Buffers are allocated once here and cleared in place by
/// every call.
#[derive(Debug, Clone)]
pub struct State {
    pub(crate) hidden: Vector,
    pub(crate) output: Vector,
    pub(crate) grad: Vector,
    pub(crate) rng: StdRng,
    loss_sum: f64,
    nexamples: u64,
}

impl State {
    /// `hidden_size` is the embedding dimension, `output_size` the number of
    /// output rows. `seed` drives this worker's sampling; two states with the
    /// same seed draw the same negatives.
    pub fn new(hidden_size: usize, output_size: usize, seed: u64) -> Self {
        State {
            hidden: Vector::new(hidden_size),
            output: Vector::new(output_size),
            grad: Vector::new(hidden_size),
            rng: StdRng::seed_from_u64(seed),
            loss_sum: 0.0,
            nexamples: 0,
        }
    }

    /// Average loss over every example seen by `update`, or `None` if there
    /// have been none yet.
    pub fn loss(&self) -> Option<f32> {
        if self.nexamples == 0 {
            None
        } else {
            Some((self.loss_sum / self.nexamples as f64) as f32)
        }
    }

    pub fn nexamples(&self) -> u64 {
        self.nexamples
    }

    pub(crate) fn increment_nexamples(&mut self, loss: f32) {
        self.loss_sum += f64::from(loss);
        self.nexamples += 1;
    }

    /// The hidden vector computed by the most recent call.
    pub fn hidden(&self) -> &Vector {
        &self.hidden
    }

    /// Per-output scores from the most recent call that computed them.
    pub fn output(&self) -> &Vector {
        &self.output
    }

    /// The gradient accumulated by the most recent `update`.
    pub fn grad(&self) -> &Vector {
        &self.grad
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_loss() {
        let mut state = State::new(4, 3, 0);
        assert_eq!(state.loss(), None);
        state.increment_nexamples(1.0);
        state.increment_nexamples(2.0);
        assert_eq!(state.nexamples(), 2);
        assert_eq!(state.loss(), Some(1.5));
    }

    #[test]
    fn buffer_sizes() {
        let state = State::new(4, 3, 0);
        assert_eq!(state.hidden().len(), 4);
        assert_eq!(state.grad().len(), 4);
        assert_eq!(state.output().len(), 3);
    }
}
