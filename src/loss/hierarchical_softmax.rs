use std::sync::Arc;

use crate::error::{Error, Result};
use crate::loss::{binary_logistic, sigmoid, std_log, Loss, LossKind};
use crate::matrix::Matrix;
use crate::predictions::Predictions;
use crate::state::State;
use crate::vector::Vector;

#[derive(Debug, Clone)]
struct Node {
    parent: Option<usize>,
    left: Option<usize>,
    right: Option<usize>,
    count: u64,
    /// Which child of its parent this node is.
    binary: bool,
}

/// Hierarchical softmax over a Huffman tree of the labels.
///
/// Leaves `0..n` are the labels; internal nodes `n..2n-1` map to output rows
/// `0..n-1`, so the last output row is unused. Frequent labels get short paths, so an update touches
/// `O(log n)` rows.
#[derive(Debug)]
pub struct HierarchicalSoftmax {
    wo: Arc<Matrix>,
    counts: Vec<u64>,
    tree: Vec<Node>,
    /// `paths[label]` lists the output rows on the way from `label` to the root.
    paths: Vec<Vec<usize>>,
    /// `codes[label][i]` is the branch taken below `paths[label][i]`.
    codes: Vec<Vec<bool>>,
}

impl HierarchicalSoftmax {
    /// `counts` has one entry per label. The tree is optimal when counts are
    /// sorted in descending order, and valid either way.
    pub fn new(wo: Arc<Matrix>, counts: &[u64]) -> Result<Self> {
        if counts.is_empty() {
            return Err(Error::InvalidArgument(
                "hierarchical softmax needs at least one label".to_string(),
            ));
        }
        if counts.len() != wo.rows() {
            return Err(Error::ShapeMismatch {
                what: "label counts",
                got: counts.len(),
                expected: wo.rows(),
            });
        }
        let mut hs = HierarchicalSoftmax {
            wo,
            counts: counts.to_vec(),
            tree: vec![],
            paths: vec![],
            codes: vec![],
        };
        hs.build_tree();
        Ok(hs)
    }

    fn osz(&self) -> usize {
        self.counts.len()
    }

    fn root(&self) -> usize {
        2 * self.osz() - 2
    }

    fn build_tree(&mut self) {
        let osz = self.osz();
        self.tree = vec![
            Node {
                parent: None,
                left: None,
                right: None,
                count: u64::MAX,
                binary: false,
            };
            2 * osz - 1
        ];
        for (node, &count) in self.tree.iter_mut().zip(&self.counts) {
            node.count = count;
        }

        // Leaves not yet merged are `0..leaf`, the least frequent last.
        // Internal nodes are created in increasing count order, so both
        // queues can be read from their cheap end. Nodes `i..` do not exist
        // yet and are never picked.
        let mut leaf = osz;
        let mut node = osz;
        for i in osz..(2 * osz - 1) {
            let mut mini = [0usize; 2];
            for m in &mut mini {
                let take_leaf = leaf > 0
                    && (node >= i || self.tree[leaf - 1].count < self.tree[node].count);
                if take_leaf {
                    leaf -= 1;
                    *m = leaf;
                } else {
                    *m = node;
                    node += 1;
                }
            }
            let [a, b] = mini;
            self.tree[i].left = Some(a);
            self.tree[i].right = Some(b);
            self.tree[i].count = self.tree[a].count.saturating_add(self.tree[b].count);
            self.tree[a].parent = Some(i);
            self.tree[b].parent = Some(i);
            self.tree[b].binary = true;
        }

        self.paths.clear();
        self.codes.clear();
        for label in 0..osz {
            let mut path = vec![];
            let mut code = vec![];
            let mut j = label;
            while let Some(parent) = self.tree[j].parent {
                path.push(parent - osz);
                code.push(self.tree[j].binary);
                j = parent;
            }
            self.paths.push(path);
            self.codes.push(code);
        }
    }

    /// Number of output rows on the path of `label`.
    pub fn path_len(&self, label: usize) -> usize {
        self.paths[label].len()
    }

    fn dfs(
        &self,
        log_threshold: Option<f32>,
        node: usize,
        score: f32,
        heap: &mut Predictions,
        hidden: &Vector,
    ) {
        if log_threshold.is_some_and(|t| score < t) {
            return;
        }
        if heap.is_full() && heap.worst_score().is_some_and(|w| score < w) {
            return;
        }

        match (self.tree[node].left, self.tree[node].right) {
            (Some(left), Some(right)) => {
                let f = sigmoid(self.wo.dot_row(hidden, node - self.osz()));
                self.dfs(log_threshold, left, score + std_log(1.0 - f), heap, hidden);
                self.dfs(log_threshold, right, score + std_log(f), heap, hidden);
            }
            _ => {
                heap.push(node, score);
            }
        }
    }
}

impl Loss for HierarchicalSoftmax {
    fn kind(&self) -> LossKind {
        LossKind::HierarchicalSoftmax
    }

    fn output_matrix(&self) -> &Arc<Matrix> {
        &self.wo
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
        let mut loss = 0.0;
        for (&row, &code) in self.paths[target].iter().zip(&self.codes[target]) {
            loss += binary_logistic(&self.wo, row, state, code, lr, backprop);
        }
        loss
    }

    /// `state.output[label]` is the probability of the label's path.
    fn compute_output(&self, state: &mut State) {
        for label in 0..self.osz() {
            let mut log_p = 0.0;
            for (&row, &code) in self.paths[label].iter().zip(&self.codes[label]) {
                let f = sigmoid(self.wo.dot_row(&state.hidden, row));
                log_p += if code { std_log(f) } else { std_log(1.0 - f) };
            }
            state.output.set(label, log_p.exp());
        }
    }

    fn predict(&self, k: usize, threshold: f32, heap: &mut Predictions, state: &mut State) {
        heap.reset(k);
        let log_threshold = (threshold > 0.0).then(|| threshold.ln());
        self.dfs(log_threshold, self.root(), 0.0, heap, &state.hidden);
        heap.finish_with(f32::exp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(counts: &[u64]) -> HierarchicalSoftmax {
        let wo = Arc::new(Matrix::new(counts.len(), 4));
        HierarchicalSoftmax::new(wo, counts).unwrap()
    }

    #[test]
    fn frequent_labels_get_short_paths() {
        let hs = tree(&[1000, 500, 100, 10, 5, 1]);
        assert_eq!(hs.path_len(0), 1);
        assert!(hs.path_len(5) > hs.path_len(1));
        for label in 0..6 {
            assert!(hs.paths[label].iter().all(|&row| row < 5));
            // Every path ends at the root.
            assert_eq!(hs.paths[label].last(), Some(&(hs.root() - 6)));
        }
    }

    #[test]
    fn codes_are_unique() {
        let hs = tree(&[8, 6, 4, 3, 2, 2, 1]);
        for a in 0..7 {
            for b in (a + 1)..7 {
                assert_ne!(
                    (&hs.paths[a], &hs.codes[a]),
                    (&hs.paths[b], &hs.codes[b])
                );
            }
        }
    }

    #[test]
    fn saturated_counts_build_a_tree() {
        for counts in [&[u64::MAX, 1][..], &[u64::MAX, u64::MAX, 1], &[u64::MAX; 4]] {
            let hs = tree(counts);
            let root = hs.root();
            for (n, node) in hs.tree.iter().enumerate() {
                match node.parent {
                    Some(parent) => assert!(parent > n && parent <= root),
                    None => assert_eq!(n, root),
                }
            }
            for label in 0..counts.len() {
                assert!(hs.path_len(label) >= 1 && hs.path_len(label) < counts.len());
            }
        }
    }

    #[test]
    fn single_label_has_empty_path() {
        let hs = tree(&[3]);
        assert_eq!(hs.path_len(0), 0);
        let mut state = State::new(4, 1, 0);
        assert_eq!(hs.forward(&[0], 0, &mut state, 0.1, true), 0.0);
    }

    #[test]
    fn leaf_probabilities_sum_to_one() {
        let counts = [9, 7, 5, 3, 1];
        let wo = Arc::new(Matrix::uniform(5, 3, 1.0, 11));
        let hs = HierarchicalSoftmax::new(wo, &counts).unwrap();
        let mut state = State::new(3, 5, 0);
        state.hidden = Vector::from_vec(vec![0.3, -0.2, 0.9]);
        hs.compute_output(&mut state);
        let total: f32 = state.output.iter().sum();
        assert!((total - 1.0).abs() < 1e-4, "total = {total}");

        let mut heap = Predictions::new();
        hs.predict(5, 0.0, &mut heap, &mut state);
        assert_eq!(heap.len(), 5);
        for p in heap.iter() {
            assert!((p.score - state.output[p.label]).abs() < 1e-4);
        }
    }
}
