use std::sync::Arc;

use log::warn;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::error::{Error, Result};
use crate::loss::{binary_logistic, compute_sigmoid_output, Loss, LossKind};
use crate::matrix::Matrix;
use crate::state::State;

/// Score the true label plus `neg` sampled negatives.
///
/// Negatives are drawn from the calling worker's own generator with
/// probability proportional to `sqrt(count)`.
#[derive(Debug)]
pub struct NegativeSampling {
    wo: Arc<Matrix>,
    neg: usize,
    counts: Vec<u64>,
    sampler: WeightedIndex<f64>,
    /// Number of labels with a non-zero count, i.e. that can be drawn.
    drawable: usize,
}

impl NegativeSampling {
    pub fn new(wo: Arc<Matrix>, neg: usize, counts: &[u64]) -> Result<Self> {
        if counts.len() != wo.rows() {
            return Err(Error::ShapeMismatch {
                what: "label counts",
                got: counts.len(),
                expected: wo.rows(),
            });
        }
        let sampler = WeightedIndex::new(counts.iter().map(|&c| (c as f64).sqrt()))
            .map_err(|err| Error::InvalidArgument(format!("label counts: {err}")))?;
        let drawable = counts.iter().filter(|&&c| c > 0).count();
        if drawable < 2 && neg > 0 {
            warn!("negative sampling with {drawable} drawable label(s): no negatives will be drawn for it");
        }
        Ok(NegativeSampling {
            wo,
            neg,
            counts: counts.to_vec(),
            sampler,
            drawable,
        })
    }

    /// Draw a label other than `target`, or `None` if there is no such label
    /// to draw.
    fn get_negative<R: Rng>(&self, target: usize, rng: &mut R) -> Option<usize> {
        let target_drawable = self.counts[target] > 0;
        if self.drawable == 0 || (self.drawable == 1 && target_drawable) {
            return None;
        }
        loop {
            let negative = self.sampler.sample(rng);
            if negative != target {
                return Some(negative);
            }
        }
    }
}

impl Loss for NegativeSampling {
    fn kind(&self) -> LossKind {
        LossKind::NegativeSampling
    }

    fn output_matrix(&self) -> &Arc<Matrix> {
        &self.wo
    }

    fn neg(&self) -> usize {
        self.neg
    }

    fn label_counts(&self) -> &[u64] {
        &self.counts
    }

    fn forward(
        &self,
        targets: &[usize],
        target_index: usize,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32 {
        let target = targets[target_index];
        let mut loss = binary_logistic(&self.wo, target, state, true, lr, backprop);

        for _ in 0..self.neg {
            let negative = match self.get_negative(target, &mut state.rng) {
                Some(n) => n,
                None => break,
            };
            loss += binary_logistic(&self.wo, negative, state, false, lr, backprop);
        }
        loss
    }

    fn compute_output(&self, state: &mut State) {
        compute_sigmoid_output(&self.wo, state);
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn sampler(counts: &[u64]) -> NegativeSampling {
        let wo = Arc::new(Matrix::new(counts.len(), 2));
        NegativeSampling::new(wo, 5, counts).unwrap()
    }

    #[test]
    fn negatives_skip_target_and_zero_counts() {
        let ns = sampler(&[100, 0, 1, 4]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = [0usize; 4];
        for _ in 0..2000 {
            let n = ns.get_negative(0, &mut rng).unwrap();
            seen[n] += 1;
        }
        assert_eq!(seen[0], 0);
        assert_eq!(seen[1], 0);
        // sqrt weighting: label 3 is drawn about twice as often as label 2.
        assert!(seen[3] > seen[2]);
    }

    #[test]
    fn same_seed_same_negatives() {
        let ns = sampler(&[5, 4, 3, 2, 1]);
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| ns.get_negative(1, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(9), draw(9));
    }

    #[test]
    fn no_distinct_negative() {
        let ns = sampler(&[7, 0]);
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(ns.get_negative(0, &mut rng), None);
        assert_eq!(ns.get_negative(1, &mut rng), Some(0));
    }

    #[test]
    fn all_zero_counts_rejected() {
        let wo = Arc::new(Matrix::new(2, 2));
        assert!(NegativeSampling::new(wo, 5, &[0, 0]).is_err());
    }
}
