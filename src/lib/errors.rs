//! Custom error types for flowcall operations.

use thiserror::Error;

/// Result type alias for flowcall operations
pub type Result<T> = std::result::Result<T, FlowcallError>;

/// Error type for flowcall operations
#[derive(Error, Debug)]
pub enum FlowcallError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// Chip geometry is malformed or inconsistent with its inputs
    #[error("Invalid chip geometry: {reason}")]
    InvalidGeometry {
        /// Explanation of the problem
        reason: String,
    },

    /// Per-well trace length does not match the run's flow count
    #[error("Flow count mismatch for well {well}: trace has {actual} flows, run expects {expected}")]
    FlowCountMismatch {
        /// Row-major well index
        well: usize,
        /// Flow count declared by the run
        expected: usize,
        /// Flow count found in the trace
        actual: usize,
    },

    /// File format error
    #[error("Invalid {file_type} file '{path}': {reason}")]
    InvalidFileFormat {
        /// Type of file (e.g., "wells", "mask")
        file_type: String,
        /// Path to the file
        path: String,
        /// Explanation of the problem
        reason: String,
    },

    /// A batch was submitted to an output group after it was finalized
    #[error("Output group '{group}' is closed; span {seq} rejected")]
    WriterClosed {
        /// The output group name
        group: String,
        /// The offending span sequence number
        seq: u64,
    },

    /// An output serialization thread stopped unexpectedly
    #[error("Output group '{group}' serialization failed: {reason}")]
    WriterFailed {
        /// The output group name
        group: String,
        /// Explanation from the serialization thread
        reason: String,
    },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
