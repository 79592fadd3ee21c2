//! Errors in the library.
use thiserror::Error;

/// Errors raised by replay buffers.
///
/// Public methods return [`anyhow::Result`]; use
/// [`anyhow::Error::downcast_ref`] to tell the variants apart, e.g. to skip a
/// training step on [`ReplayBufferError::InsufficientData`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayBufferError {
    /// An argument is out of its valid range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Shape of a field disagrees with the shape established in the buffer.
    #[error("Shape mismatch in field `{field}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Name of the field.
        field: String,

        /// Shape established by the buffer.
        expected: Vec<usize>,

        /// Shape of the incoming data.
        actual: Vec<usize>,
    },

    /// The buffer does not hold enough transitions to serve the request.
    #[error("Insufficient data: {0}")]
    InsufficientData(String),
}
