//! Training and inference core of a fastText-style classifier.
//!
//! A [`Model`] averages rows of an input embedding matrix into a hidden
//! vector, scores it against an output matrix through a [`Loss`], and either
//! applies an SGD update or ranks labels into a [`Predictions`] buffer.
//! Each worker thread brings its own [`State`]; the model itself is shared.

mod args;
mod error;
mod matrix;
mod model;
mod predictions;
mod snapshot;
mod state;
mod vector;

pub mod loss;

pub use args::ModelArgs;
pub use error::{Error, Result};
pub use loss::{Loss, LossKind};
pub use matrix::Matrix;
pub use model::{Model, UNLIMITED};
pub use predictions::{Prediction, Predictions};
pub use snapshot::{MatrixData, ModelSnapshot};
pub use state::State;
pub use vector::Vector;
