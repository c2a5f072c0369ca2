//! Error types for the Supportive engine.

use crate::model::ModelState;
use crate::transport::TransportError;
use std::fmt;
use thiserror::Error;

/// A lifecycle-sensitive model operation, used to describe state errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    Save,
    Fetch,
    Destroy,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOp::Save => "save",
            SyncOp::Fetch => "fetch",
            SyncOp::Destroy => "destroy",
        };
        f.write_str(name)
    }
}

/// All possible errors from the Supportive engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Caller errors
    #[error("validation failed: {0}")]
    Validation(String),

    // Lifecycle errors
    #[error("cannot {operation} a model in the {state} state")]
    State { operation: SyncOp, state: ModelState },

    #[error("no comparator available to use for sort")]
    NoComparator,

    // Sync errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
