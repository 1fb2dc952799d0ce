//! Error types for the sync engine.

use shiftdesk_store::{PathError, StoreError, ValidationError};
use thiserror::Error;

/// Errors that can occur in the sync engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A candidate snapshot was rejected.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A path update could not be applied.
    #[error("invalid update path: {0}")]
    Path(#[from] PathError),

    /// A single store call failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Merging remote and local state produced a snapshot that fails validation.
    #[error("merge produced an invalid snapshot: {0}")]
    InvalidMerge(ValidationError),

    /// Every attempt of a store operation failed.
    #[error("sync failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: StoreError },

    /// The snapshot could not be converted to or from JSON.
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl EngineError {
    /// Whether the caller's input was at fault rather than the store.
    pub fn is_rejected_input(&self) -> bool {
        matches!(self, EngineError::Validation(_) | EngineError::Path(_))
    }
}
