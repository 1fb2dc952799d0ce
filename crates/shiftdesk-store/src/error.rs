//! Error types for the document store and snapshot helpers.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to a remote document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store is temporarily unable to serve the request.
    #[error("store unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    /// A compare-and-swap precondition failed on every attempt.
    #[error("write conflict on {collection}/{id}")]
    Conflict { collection: String, id: String },

    /// Invalid response from the store.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The call did not complete in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// The transaction mutator refused to produce a document.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// The stored document does not have the expected shape.
    #[error("malformed document: {0}")]
    MalformedDocument(String),
}

impl StoreError {
    /// Check if an error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            StoreError::Unavailable { .. } | StoreError::Conflict { .. } | StoreError::Timeout(_) => {
                true
            }
            _ => false,
        }
    }
}

/// A candidate snapshot failed the shape contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The value is not a JSON object.
    #[error("snapshot must be an object")]
    NotAnObject,

    /// The `tables` member is missing or not an array.
    #[error("snapshot tables must be an array")]
    TablesNotArray,

    /// A single record failed its shape checks.
    #[error("invalid record at index {index} (id: {}): bad {field}", id.as_deref().unwrap_or("<none>"))]
    InvalidRecord {
        index: usize,
        id: Option<String>,
        field: RecordField,
    },

    /// The shape checks passed but an envelope field has the wrong type.
    #[error("snapshot could not be decoded: {0}")]
    Decode(String),
}

/// The record field that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Record,
    Id,
    Country,
    Date,
    Agents,
}

impl std::fmt::Display for RecordField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordField::Record => "record",
            RecordField::Id => "id",
            RecordField::Country => "country",
            RecordField::Date => "date",
            RecordField::Agents => "agents",
        };
        f.write_str(name)
    }
}

/// A path-based update could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    /// No path segments were given.
    #[error("update path must not be empty")]
    Empty,

    /// A segment tried to descend into a scalar value.
    #[error("segment {segment:?} does not address a container")]
    NotAContainer { segment: String },

    /// An array segment was not a usable index.
    #[error("segment {segment:?} is not a valid index for an array of length {len}")]
    BadIndex { segment: String, len: usize },
}
