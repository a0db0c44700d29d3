//! Loss strategies.
//!
//! A loss scores the hidden vector held in a [`State`] against the rows of the
//! output matrix. During training it also accumulates the gradient for the
//! hidden vector into `state.grad` and updates the output rows it visits.
//!
//! Every variant holds an `Arc` to the same output matrix as the
//! [`Model`](crate::Model) that uses it.

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::predictions::Predictions;
use crate::state::State;
use crate::vector::Vector;

mod hierarchical_softmax;
mod negative_sampling;
mod one_vs_all;
mod softmax;

pub use hierarchical_softmax::HierarchicalSoftmax;
pub use negative_sampling::NegativeSampling;
pub use one_vs_all::OneVsAll;
pub use softmax::Softmax;

/// Which loss a model trains with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
pub enum LossKind {
    /// Independent binary logistic regression for every label (multi-label).
    #[value(alias = "ova")]
    OneVsAll,
    /// The true label plus a few sampled negatives.
    #[value(alias = "ns")]
    NegativeSampling,
    /// Binary decisions along a Huffman-coded path to the label.
    #[value(alias = "hs")]
    HierarchicalSoftmax,
    /// Normalized scores over every label.
    Softmax,
}

impl Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LossKind::OneVsAll => "one-vs-all",
            LossKind::NegativeSampling => "negative-sampling",
            LossKind::HierarchicalSoftmax => "hierarchical-softmax",
            LossKind::Softmax => "softmax",
        };
        f.write_str(name)
    }
}

impl LossKind {
    /// True if `forward` scores only `targets[target_index]`; false if it
    /// looks at the whole target set.
    pub fn uses_target_index(self) -> bool {
        !matches!(self, LossKind::OneVsAll)
    }

    /// True if building this loss needs per-label counts.
    pub fn needs_label_counts(self) -> bool {
        matches!(
            self,
            LossKind::NegativeSampling | LossKind::HierarchicalSoftmax
        )
    }
}

pub trait Loss: Debug + Send + Sync {
    fn kind(&self) -> LossKind;

    /// The output matrix this loss reads and updates.
    fn output_matrix(&self) -> &Arc<Matrix>;

    /// Number of sampled negatives per example. Zero unless sampling.
    fn neg(&self) -> usize {
        0
    }

    /// Per-label counts the loss was built from, if it needed any.
    fn label_counts(&self) -> &[u64] {
        &[]
    }

    /// Score `state.hidden` and return the example's loss.
    ///
    /// If `backprop` is set, add `lr`-scaled gradient for the hidden vector
    /// into `state.grad` and update the visited output rows in place.
    ///
    /// Callers must check ids first: this panics if a target is not an
    /// output row or `target_index` is out of range (for losses that use it).
    fn forward(
        &self,
        targets: &[usize],
        target_index: usize,
        state: &mut State,
        lr: f32,
        backprop: bool,
    ) -> f32;

    /// Fill `state.output` with a score for every label.
    fn compute_output(&self, state: &mut State);

    /// Fill `heap` with the best `k` labels scoring at least `threshold`.
    fn predict(&self, k: usize, threshold: f32, heap: &mut Predictions, state: &mut State) {
        heap.reset(k);
        self.compute_output(state);
        find_k_best(threshold, heap, &state.output);
        heap.finish();
    }
}

/// Build the loss named by `kind` over `wo`.
///
/// `label_counts` is required (one count per output row) for
/// negative sampling and hierarchical softmax, and ignored otherwise.
pub fn build(
    kind: LossKind,
    wo: Arc<Matrix>,
    label_counts: &[u64],
    neg: usize,
) -> Result<Box<dyn Loss>> {
    debug!(
        "building {kind} loss over {} output rows of width {}",
        wo.rows(),
        wo.cols()
    );
    if kind.needs_label_counts() && label_counts.len() != wo.rows() {
        return Err(Error::ShapeMismatch {
            what: "label counts",
            got: label_counts.len(),
            expected: wo.rows(),
        });
    }
    Ok(match kind {
        LossKind::OneVsAll => Box::new(OneVsAll::new(wo)),
        LossKind::NegativeSampling => Box::new(NegativeSampling::new(wo, neg, label_counts)?),
        LossKind::HierarchicalSoftmax => Box::new(HierarchicalSoftmax::new(wo, label_counts)?),
        LossKind::Softmax => Box::new(Softmax::new(wo)),
    })
}

const LOG_FLOOR: f32 = 1e-5;

/// Natural log with the argument floored at `1e-5`, so a saturated sigmoid
/// costs a large but finite loss.
pub(crate) fn std_log(x: f32) -> f32 {
    x.max(LOG_FLOOR).ln()
}

pub(crate) fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One binary logistic regression step against output row `target`.
///
/// `p = sigmoid(hidden . wo[target])`. Returns `-log p` for a positive label,
/// `-log (1 - p)` otherwise.
pub(crate) fn binary_logistic(
    wo: &Matrix,
    target: usize,
    state: &mut State,
    label_is_positive: bool,
    lr: f32,
    backprop: bool,
) -> f32 {
    let score = sigmoid(wo.dot_row(&state.hidden, target));
    if backprop {
        let label = if label_is_positive { 1.0 } else { 0.0 };
        let alpha = lr * (label - score);
        state.grad.add_row(wo, target, alpha);
        wo.add_vector_to_row(&state.hidden, target, alpha);
    }
    if label_is_positive {
        -std_log(score)
    } else {
        -std_log(1.0 - score)
    }
}

/// `state.output[i] = sigmoid(hidden . wo[i])` for every row.
pub(crate) fn compute_sigmoid_output(wo: &Matrix, state: &mut State) {
    for i in 0..wo.rows() {
        let score = sigmoid(wo.dot_row(&state.hidden, i));
        state.output.set(i, score);
    }
}

fn find_k_best(threshold: f32, heap: &mut Predictions, output: &Vector) {
    for i in 0..output.len() {
        let score = output[i];
        if score < threshold {
            continue;
        }
        heap.push(i, score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_and_log() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!((sigmoid(2.0) + sigmoid(-2.0) - 1.0).abs() < 1e-6);
        assert_eq!(sigmoid(-200.0), 0.0);
        assert!(std_log(0.0).is_finite());
        assert_eq!(std_log(1.0), 0.0);
    }

    #[test]
    fn binary_logistic_step() {
        let wo = Matrix::from_rows(&[[1.0, 0.0]]).unwrap();
        let mut state = State::new(2, 1, 0);
        state.hidden = Vector::from_vec(vec![0.0, 2.0]);

        // dot = 0, so p = 0.5 and alpha = lr * 0.5.
        let loss = binary_logistic(&wo, 0, &mut state, true, 0.1, true);
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-6);
        assert_eq!(state.grad.to_vec(), vec![0.05, 0.0]);
        assert_eq!(wo.row(0), vec![1.0, 0.1]);
    }

    #[test]
    fn build_checks_label_counts() {
        let wo = Arc::new(Matrix::new(3, 2));
        assert!(build(LossKind::HierarchicalSoftmax, wo.clone(), &[1, 2], 0).is_err());
        assert!(build(LossKind::NegativeSampling, wo.clone(), &[3, 2, 1], 5).is_ok());
        let ova = build(LossKind::OneVsAll, wo, &[], 0).unwrap();
        assert_eq!(ova.kind(), LossKind::OneVsAll);
    }

    #[test]
    fn kind_names() {
        assert_eq!(LossKind::HierarchicalSoftmax.to_string(), "hierarchical-softmax");
        assert!(LossKind::Softmax.uses_target_index());
        assert!(!LossKind::OneVsAll.uses_target_index());
    }
}
