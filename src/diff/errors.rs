//! Error types for the diff engine.
//!
//! Resolution failures are plan-time fatal. Diffability problems are not
//! errors at all; they surface as session warnings and schema-only output.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for diff operations.
pub type DiffResult<T> = Result<T, DiffError>;

/// Diff engine errors.
#[derive(Debug, Error)]
pub enum DiffError {
    /// a ref expression did not resolve to a commit
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// a range expression was malformed
    #[error("invalid range expression: {0}")]
    InvalidRange(String),

    /// two range endpoints share no common ancestor
    #[error("no merge base between {0} and {1}")]
    NoMergeBase(String, String),

    /// the named table exists on neither side of the range
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// a table function argument failed bind-time validation
    #[error("invalid argument {argument}: {reason}")]
    InvalidArgument { argument: String, reason: String },

    /// wrong number of table function arguments
    #[error("wrong argument count: expected {expected}, got {got}")]
    WrongArgumentCount { expected: String, got: usize },

    /// underlying storage failure, fatal mid-iteration
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl DiffError {
    /// true for failures that reject a query before any row streams
    pub fn is_plan_time(&self) -> bool {
        matches!(
            self,
            DiffError::RefNotFound(_)
                | DiffError::InvalidRange(_)
                | DiffError::NoMergeBase(_, _)
                | DiffError::TableNotFound(_)
                | DiffError::InvalidArgument { .. }
                | DiffError::WrongArgumentCount { .. }
        )
    }
}
