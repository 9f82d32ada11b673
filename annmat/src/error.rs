//! Error types for annmat operations

use annmat_core::FormatError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced to callers of annmat.
///
/// Every variant is recoverable by the caller. Broken internal shape
/// invariants are programming errors and panic instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A label or position is not present on the axis.
    #[error("index error: {0}")]
    IndexError(String),
    /// A selector, matrix or table disagrees with the expected shape.
    #[error("dimension mismatch: {context} (expected {expected}, got {actual})")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },
    /// The on-disk source behind a backed matrix can no longer be read.
    #[error("backing file unavailable: {}", .0.display())]
    BackingUnavailable(PathBuf),
    /// Incompatible metadata columns across concatenation inputs.
    #[error("schema conflict in column `{column}`: {left} vs {right}")]
    SchemaConflict {
        column: String,
        left: String,
        right: String,
    },
    /// The orthogonal axes cannot be reconciled under the requested join.
    #[error("axis mismatch: {0}")]
    AxisMismatch(String),
    /// Concatenation was given no containers.
    #[error("no containers to concatenate")]
    EmptyInput,
    /// A path or named element does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A file header or payload layout is invalid.
    #[error("format error: {0}")]
    Format(#[from] FormatError),
    /// The JSON manifest is malformed or inconsistent.
    #[error("invalid manifest: {0}")]
    Manifest(String),
    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Manifest (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A chunked read was abandoned through its cancel token.
    #[error("read cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Error::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }
}

/// Result type for annmat operations
pub type Result<T> = std::result::Result<T, Error>;
