//! Error types for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use shiftdesk_cache::EngineError;
use shiftdesk_store::StoreError;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while handling a request.
#[derive(Debug, Error)]
pub enum WebError {
    /// Sync engine error.
    #[error("{0}")]
    Engine(#[from] EngineError),

    /// Document store error.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The request body could not be read.
    #[error("invalid request body: {0}")]
    Body(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WebError {
    /// Whether the request itself was unacceptable, as opposed to a failure
    /// reaching or updating the store.
    pub fn is_rejected_input(&self) -> bool {
        match self {
            WebError::Body(_) => true,
            WebError::Engine(e) => e.is_rejected_input(),
            WebError::Store(_) | WebError::Io(_) => false,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        if self.is_rejected_input() {
            debug!(error = %self, "request rejected");
        } else {
            warn!(error = %self, "request failed");
        }
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiftdesk_store::ValidationError;

    #[test]
    fn test_rejected_input_classification() {
        assert!(WebError::Body("missing field".into()).is_rejected_input());
        assert!(WebError::from(EngineError::from(ValidationError::NotAnObject)).is_rejected_input());

        let unavailable = StoreError::Unavailable {
            status: 503,
            message: "down".into(),
        };
        assert!(!WebError::from(unavailable).is_rejected_input());
    }

    #[tokio::test]
    async fn test_rejected_input_is_still_a_server_error() {
        let response = WebError::Body("missing field".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
