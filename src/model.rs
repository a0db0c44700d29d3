use std::sync::Arc;

use log::debug;

use crate::args::ModelArgs;
use crate::error::{check_index, Error, Result};
use crate::loss::{self, Loss, LossKind};
use crate::matrix::Matrix;
use crate::predictions::Predictions;
use crate::state::State;
use crate::vector::Vector;

/// Pass as `k` to [`Model::predict`] to rank every label.
pub const UNLIMITED: usize = usize::MAX;

/// A bag-of-features model: input embeddings, output parameters, and a loss.
///
/// `Model` is `Sync`. Any number of threads may call [`predict`](Self::predict)
/// and [`update`](Self::update) on the same model at once, each with its own
/// [`State`]. Updates are applied without locks (unless the matrices were
/// built with row locks), so concurrent writers can interleave on a row and
/// readers can observe a partially applied update.
#[derive(Debug)]
pub struct Model {
    wi: Arc<Matrix>,
    wo: Arc<Matrix>,
    loss: Box<dyn Loss>,
    normalize_gradient: bool,
}

impl Model {
    /// Assemble a model. `loss` must have been built over `wo`.
    pub fn new(
        wi: Arc<Matrix>,
        wo: Arc<Matrix>,
        loss: Box<dyn Loss>,
        normalize_gradient: bool,
    ) -> Result<Self> {
        if wi.cols() != wo.cols() {
            return Err(Error::ShapeMismatch {
                what: "output matrix width",
                got: wo.cols(),
                expected: wi.cols(),
            });
        }
        if !Arc::ptr_eq(loss.output_matrix(), &wo) {
            return Err(Error::InvalidArgument(
                "loss must share the model's output matrix".to_string(),
            ));
        }
        Ok(Model {
            wi,
            wo,
            loss,
            normalize_gradient,
        })
    }

    /// Build a model with fresh parameters: input rows uniform in
    /// `[-1/dim, 1/dim)`, output rows zero.
    ///
    /// `label_counts` has one entry per label and fixes the number of output
    /// rows. Only the sampling losses look at the counts themselves.
    pub fn from_args(args: &ModelArgs, input_rows: usize, label_counts: &[u64]) -> Result<Self> {
        if args.dim == 0 {
            return Err(Error::InvalidArgument("dim must be at least 1".to_string()));
        }
        if input_rows == 0 {
            return Err(Error::InvalidArgument(
                "input matrix needs at least one row".to_string(),
            ));
        }
        if label_counts.is_empty() {
            return Err(Error::InvalidArgument(
                "model needs at least one label".to_string(),
            ));
        }

        let mut wi = Matrix::uniform(input_rows, args.dim, 1.0 / args.dim as f32, args.seed);
        let mut wo = Matrix::new(label_counts.len(), args.dim);
        if let Some(shards) = args.row_lock_shards {
            debug!("guarding matrix rows with {shards} lock shards");
            wi = wi.with_row_locks(shards);
            wo = wo.with_row_locks(shards);
        }
        let wi = Arc::new(wi);
        let wo = Arc::new(wo);
        let loss = loss::build(args.loss, wo.clone(), label_counts, args.neg)?;
        debug!(
            "model: {input_rows} input rows, {} labels, dim {}, {} loss",
            label_counts.len(),
            args.dim,
            args.loss
        );
        Model::new(wi, wo, loss, args.normalize_gradient)
    }

    pub fn input_matrix(&self) -> &Arc<Matrix> {
        &self.wi
    }

    pub fn output_matrix(&self) -> &Arc<Matrix> {
        &self.wo
    }

    pub fn loss(&self) -> &dyn Loss {
        self.loss.as_ref()
    }

    pub fn loss_kind(&self) -> LossKind {
        self.loss.kind()
    }

    /// The embedding dimension.
    pub fn dim(&self) -> usize {
        self.wi.cols()
    }

    pub fn input_rows(&self) -> usize {
        self.wi.rows()
    }

    pub fn output_rows(&self) -> usize {
        self.wo.rows()
    }

    pub fn normalize_gradient(&self) -> bool {
        self.normalize_gradient
    }

    /// A `State` sized for this model.
    pub fn new_state(&self, seed: u64) -> State {
        State::new(self.dim(), self.output_rows(), seed)
    }

    fn check_state(&self, state: &State) -> Result<()> {
        let checks = [
            ("hidden buffer", state.hidden.len(), self.dim()),
            ("gradient buffer", state.grad.len(), self.dim()),
            ("output buffer", state.output.len(), self.output_rows()),
        ];
        for (what, got, expected) in checks {
            if got != expected {
                return Err(Error::ShapeMismatch {
                    what,
                    got,
                    expected,
                });
            }
        }
        Ok(())
    }

    fn check_input(&self, input: &[usize]) -> Result<()> {
        for &i in input {
            check_index("input row", i, self.input_rows())?;
        }
        Ok(())
    }

    fn compute_hidden(&self, input: &[usize], state: &mut State) {
        let hidden = &mut state.hidden;
        hidden.zero();
        for &row in input {
            hidden.add_row(&self.wi, row, 1.0);
        }
        if !input.is_empty() {
            hidden.scale(1.0 / input.len() as f32);
        }
    }

    /// The average of the input rows named by `input` (a "sentence vector").
    ///
    /// Empty input gives the zero vector.
    pub fn hidden<'s>(&self, input: &[usize], state: &'s mut State) -> Result<&'s Vector> {
        self.check_state(state)?;
        self.check_input(input)?;
        self.compute_hidden(input, state);
        Ok(&state.hidden)
    }

    /// Rank the labels for `input`.
    ///
    /// On return `heap` holds at most `k` labels scoring at least
    /// `threshold`, best first. `k == UNLIMITED` means every label; `k == 0`
    /// is an error. Empty input is scored as the zero hidden vector.
    pub fn predict(
        &self,
        input: &[usize],
        k: usize,
        threshold: f32,
        heap: &mut Predictions,
        state: &mut State,
    ) -> Result<()> {
        let k = if k == UNLIMITED { self.output_rows() } else { k };
        if k == 0 {
            return Err(Error::InvalidArgument(
                "k needs to be 1 or higher".to_string(),
            ));
        }
        self.check_state(state)?;
        self.check_input(input)?;

        self.compute_hidden(input, state);
        self.loss.predict(k, threshold, heap, state);
        Ok(())
    }

    /// One SGD step on a single example.
    ///
    /// `targets` are label ids. Losses that score a single label use
    /// `targets[target_index]`; one-vs-all uses the whole set. The example's
    /// loss is added to `state`. Empty `input` does nothing at all.
    ///
    /// Every occurrence of an id in `input` receives the gradient, so a
    /// feature listed twice is updated twice.
    pub fn update(
        &self,
        input: &[usize],
        targets: &[usize],
        target_index: usize,
        lr: f32,
        state: &mut State,
    ) -> Result<()> {
        if input.is_empty() {
            return Ok(());
        }
        self.check_state(state)?;
        self.check_input(input)?;
        for &t in targets {
            check_index("target label", t, self.output_rows())?;
        }
        if self.loss.kind().uses_target_index() {
            check_index("target index", target_index, targets.len())?;
        }

        self.compute_hidden(input, state);
        state.grad.zero();

        let loss = self.loss.forward(targets, target_index, state, lr, true);
        state.increment_nexamples(loss);

        if self.normalize_gradient {
            state.grad.scale(1.0 / input.len() as f32);
        }
        for &i in input {
            self.wi.add_vector_to_row(&state.grad, i, 1.0);
        }
        Ok(())
    }
}
