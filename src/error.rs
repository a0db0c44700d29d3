use std::fmt;

/// The result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported to callers of the engine.
///
/// All of these indicate a programming error in the caller (a bad id, a bad
/// `k`, inconsistent construction parameters). None of them are transient.
#[derive(Debug)]
pub enum Error {
    /// An argument is invalid for semantic reasons, e.g. `k == 0`.
    InvalidArgument(String),

    /// An id does not address a row (or target slot) that exists.
    IndexOutOfRange {
        /// What was being indexed, e.g. "input row".
        what: &'static str,
        index: usize,
        len: usize,
    },

    /// Two sizes that must agree do not.
    ShapeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// A model snapshot could not be encoded or decoded.
    Snapshot(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::IndexOutOfRange { what, index, len } => {
                write!(f, "{what} {index} out of range (have {len})")
            }
            Error::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(f, "shape mismatch for {what}: got {got}, expected {expected}"),
            Error::Snapshot(msg) => write!(f, "model snapshot: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Snapshot(err.to_string())
    }
}

/// Check that `index < len`, reporting `what` on failure.
pub(crate) fn check_index(what: &'static str, index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::IndexOutOfRange { what, index, len })
    }
}
