//! HTTP document store client.
//!
//! Speaks a small versioned-document protocol:
//!
//! - `GET  {base}/v1/documents/{collection}/{id}` returns `{ value, version }`
//!   or `404` when the document does not exist
//! - `PUT  {base}/v1/documents/{collection}/{id}` with body `{ value }` writes
//!   the document; `If-Match: <version>` (or `If-None-Match: *` for a new
//!   document) makes the write conditional and a stale precondition answers
//!   `412`
//!
//! `commit_document` is an optimistic transaction built from those two calls:
//! read, mutate, conditionally write, and start over on `412`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::StoreError;
use crate::store::{DocumentStore, Mutator};

/// Number of read-modify-write rounds before a commit gives up on contention.
const MAX_COMMIT_ROUNDS: u32 = 5;

/// A stored document and its version token.
#[derive(Debug, Clone, Deserialize)]
struct VersionedDocument {
    value: Value,
    version: String,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    value: &'a Value,
}

/// Error body returned by the store.
#[derive(Debug, Deserialize)]
struct StoreErrorBody {
    message: String,
}

/// Client for a remote versioned document store.
pub struct HttpDocumentStore {
    http: Client,
    base_url: String,
}

impl HttpDocumentStore {
    /// Create a new client for the given store URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, StoreError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Get the store URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn document_url(&self, collection: &str, id: &str) -> String {
        format!("{}/v1/documents/{}/{}", self.base_url, collection, id)
    }

    async fn get_versioned(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<VersionedDocument>, StoreError> {
        let response = self.http.get(self.document_url(collection, id)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = check_status(response).await?;
        let doc = response.json().await?;
        Ok(Some(doc))
    }

    /// Conditionally write a document. Returns `false` on a failed precondition.
    async fn put_versioned(
        &self,
        collection: &str,
        id: &str,
        value: &Value,
        expected_version: Option<&str>,
    ) -> Result<bool, StoreError> {
        let request = self
            .http
            .put(self.document_url(collection, id))
            .json(&WriteRequest { value });

        let request = match expected_version {
            Some(version) => request.header("If-Match", version),
            None => request.header("If-None-Match", "*"),
        };

        let response = request.send().await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Ok(false);
        }

        check_status(response).await?;
        Ok(true)
    }
}

/// Map non-success statuses to errors.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.map_err(|e| {
        StoreError::InvalidResponse(format!(
            "request failed ({}): failed to read response: {}",
            status, e
        ))
    })?;
    let message = serde_json::from_str::<StoreErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text);

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(StoreError::Unavailable {
            status: status.as_u16(),
            message,
        });
    }

    Err(StoreError::InvalidResponse(format!(
        "request failed ({}): {}",
        status, message
    )))
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn load_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let doc = self.get_versioned(collection, id).await?;
        if doc.is_none() {
            debug!(collection, id, "document does not exist");
        }
        Ok(doc.map(|d| d.value))
    }

    async fn commit_document(
        &self,
        collection: &str,
        id: &str,
        mutator: Mutator<'_>,
    ) -> Result<Value, StoreError> {
        for round in 1..=MAX_COMMIT_ROUNDS {
            let current = self.get_versioned(collection, id).await?;
            let version = current.as_ref().map(|d| d.version.clone());
            let next = mutator(current.map(|d| d.value))?;

            if self
                .put_versioned(collection, id, &next, version.as_deref())
                .await?
            {
                debug!(collection, id, round, "committed document");
                return Ok(next);
            }

            warn!(collection, id, round, "document changed during commit, retrying");
        }

        Err(StoreError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    async fn put_document(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError> {
        let response = self
            .http
            .put(self.document_url(collection, id))
            .json(&WriteRequest { value: &value })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PATH: &str = "/v1/documents/shifts/shiftTables";

    #[test]
    fn test_base_url_trailing_slash() {
        let store = HttpDocumentStore::new("https://store.example.com/").unwrap();
        assert_eq!(store.base_url(), "https://store.example.com");
        assert_eq!(
            store.document_url("shifts", "shiftTables"),
            "https://store.example.com/v1/documents/shifts/shiftTables"
        );
    }

    #[tokio::test]
    async fn test_load_existing_document() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "tables": [] },
                "version": "v1"
            })))
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let doc = store.load_document("shifts", "shiftTables").await.unwrap();
        assert_eq!(doc, Some(json!({ "tables": [] })));
    }

    #[tokio::test]
    async fn test_load_missing_document() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        assert_eq!(store.load_document("shifts", "shiftTables").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(
                ResponseTemplate::new(503).set_body_json(json!({ "message": "maintenance" })),
            )
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let err = store.load_document("shifts", "shiftTables").await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("maintenance"));
    }

    #[tokio::test]
    async fn test_commit_creates_missing_document() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .and(header("If-None-Match", "*"))
            .and(body_json(json!({ "value": { "tables": [] } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "v1" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let written = store
            .commit_document("shifts", "shiftTables", &|current| {
                assert!(current.is_none());
                Ok(json!({ "tables": [] }))
            })
            .await
            .unwrap();
        assert_eq!(written, json!({ "tables": [] }));
    }

    #[tokio::test]
    async fn test_commit_retries_on_precondition_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "tables": [] },
                "version": "v7"
            })))
            .mount(&mock_server)
            .await;

        // First conditional write loses the race, the second one lands.
        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .and(header("If-Match", "v7"))
            .respond_with(ResponseTemplate::new(412))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .and(header("If-Match", "v7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "v8" })))
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let result = store
            .commit_document("shifts", "shiftTables", &|current| {
                Ok(current.unwrap_or_else(|| json!({ "tables": [] })))
            })
            .await;
        assert!(result.is_ok());

        let puts = mock_server
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() == "PUT")
            .count();
        assert_eq!(puts, 2);
    }

    #[tokio::test]
    async fn test_commit_gives_up_after_repeated_conflicts() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "tables": [] },
                "version": "v1"
            })))
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(412))
            .expect(MAX_COMMIT_ROUNDS as u64)
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let err = store
            .commit_document("shifts", "shiftTables", &|current| {
                Ok(current.unwrap_or(Value::Null))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_aborted_mutator_skips_write() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        let err = store
            .commit_document("shifts", "shiftTables", &|_| {
                Err(StoreError::Aborted("invalid merge".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
    }

    #[tokio::test]
    async fn test_put_document() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/documents/deletedShiftTables/a"))
            .and(body_json(json!({ "value": { "id": "a" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "version": "v1" })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let store = HttpDocumentStore::new(mock_server.uri()).unwrap();
        store
            .put_document("deletedShiftTables", "a", json!({ "id": "a" }))
            .await
            .unwrap();
    }
}
