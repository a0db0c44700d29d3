//! Reusable top-k buffer for predictions.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

/// One ranked prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub label: usize,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    score: OrderedFloat<f32>,
    label: usize,
}

// "Greater" means "worse": lower score, then higher label. That puts the
// entry to evict at the top of the `BinaryHeap`.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then(self.label.cmp(&other.label))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The best `k` (label, score) pairs seen during one predict call.
///
/// The caller owns one of these per worker and passes it to every
/// [`Model::predict`](crate::Model::predict) call. The buffer is reset at the
/// start of each call and keeps its allocations, so steady-state prediction
/// does not allocate.
///
/// After the call, [`as_slice`](Self::as_slice) holds at most `k` entries in
/// descending score order, with equal scores ordered by ascending label.
#[derive(Debug, Default, Clone)]
pub struct Predictions {
    k: usize,
    heap: BinaryHeap<Candidate>,
    ranked: Vec<Prediction>,
}

impl Predictions {
    pub fn new() -> Self {
        Predictions::default()
    }

    pub fn with_capacity(k: usize) -> Self {
        Predictions {
            k,
            heap: BinaryHeap::with_capacity(k),
            ranked: Vec::with_capacity(k),
        }
    }

    pub(crate) fn reset(&mut self, k: usize) {
        self.k = k;
        self.heap.clear();
        self.ranked.clear();
    }

    pub(crate) fn is_full(&self) -> bool {
        self.heap.len() >= self.k
    }

    /// Score of the entry that would be evicted next.
    pub(crate) fn worst_score(&self) -> Option<f32> {
        self.heap.peek().map(|c| c.score.into_inner())
    }

    /// Offer a candidate. Returns `true` if it was kept.
    pub(crate) fn push(&mut self, label: usize, score: f32) -> bool {
        let candidate = Candidate {
            score: OrderedFloat(score),
            label,
        };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
            return true;
        }
        match self.heap.peek_mut() {
            Some(mut worst) if candidate < *worst => {
                *worst = candidate;
                true
            }
            _ => false,
        }
    }

    /// Move the heap contents into ranked order.
    pub(crate) fn finish(&mut self) {
        self.finish_with(|s| s);
    }

    /// Like `finish`, but first maps every score through `f`, which must be
    /// monotonically non-decreasing (e.g. `f32::exp` on log-probabilities).
    pub(crate) fn finish_with(&mut self, f: impl Fn(f32) -> f32) {
        self.ranked.clear();
        self.ranked.extend(self.heap.drain().map(|c| Prediction {
            label: c.label,
            score: f(c.score.into_inner()),
        }));
        self.ranked.sort_unstable_by(|a, b| {
            OrderedFloat(b.score)
                .cmp(&OrderedFloat(a.score))
                .then(a.label.cmp(&b.label))
        });
    }

    pub fn as_slice(&self) -> &[Prediction] {
        &self.ranked
    }

    pub fn iter(&self) -> impl Iterator<Item = &Prediction> + '_ {
        self.ranked.iter()
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    /// The best prediction, if any.
    pub fn best(&self) -> Option<Prediction> {
        self.ranked.first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(p: &Predictions) -> Vec<(usize, f32)> {
        p.iter().map(|p| (p.label, p.score)).collect()
    }

    #[test]
    fn keeps_best_k() {
        let mut p = Predictions::new();
        p.reset(3);
        for (label, score) in [(0, 0.1), (1, 0.9), (2, 0.4), (3, 0.8), (4, 0.05)] {
            p.push(label, score);
        }
        p.finish();
        assert_eq!(ranked(&p), vec![(1, 0.9), (3, 0.8), (2, 0.4)]);
        assert_eq!(p.best(), Some(Prediction { label: 1, score: 0.9 }));
    }

    #[test]
    fn ties_go_to_lower_label() {
        let mut p = Predictions::new();
        p.reset(2);
        for label in [4, 2, 3, 0, 1] {
            p.push(label, 0.5);
        }
        p.finish();
        assert_eq!(ranked(&p), vec![(0, 0.5), (1, 0.5)]);
    }

    #[test]
    fn reset_clears_previous_results() {
        let mut p = Predictions::with_capacity(4);
        p.reset(4);
        p.push(7, 1.0);
        p.finish();
        assert_eq!(p.len(), 1);

        p.reset(1);
        assert!(!p.is_full());
        p.push(3, 0.25);
        assert!(p.is_full());
        assert_eq!(p.worst_score(), Some(0.25));
        assert!(!p.push(5, 0.1));
        p.finish_with(|s| s * 2.0);
        assert_eq!(ranked(&p), vec![(3, 0.5)]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut p = Predictions::new();
        p.reset(0);
        assert!(!p.push(0, 1.0));
        p.finish();
        assert!(p.is_empty());
    }
}
