//! The remote document store seam.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::records::{AGENTS_COLLECTION, AGENTS_DOCUMENT};
use crate::{AgentRoster, StoreError};

/// Mutator run inside a store transaction.
///
/// Receives the current remote document (`None` when absent) and returns the
/// document to write. Returning an error aborts the transaction without
/// writing. The store may call it more than once if the transaction retries.
pub type Mutator<'a> = &'a (dyn Fn(Option<Value>) -> Result<Value, StoreError> + Send + Sync);

/// A remote document database with an atomic read-modify-write primitive.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read. Returns `None` if the document does not exist.
    async fn load_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Atomically read the current document, apply `mutator`, and write the
    /// result back. Returns the document that was written.
    async fn commit_document(
        &self,
        collection: &str,
        id: &str,
        mutator: Mutator<'_>,
    ) -> Result<Value, StoreError>;

    /// Unconditional write.
    async fn put_document(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError>;
}

/// Load the agent roster, falling back to empty lists per country.
pub async fn load_agents<S: AsRef<str>>(store: &dyn DocumentStore, countries: &[S]) -> AgentRoster {
    match store.load_document(AGENTS_COLLECTION, AGENTS_DOCUMENT).await {
        Ok(Some(value)) => match serde_json::from_value::<AgentRoster>(value) {
            Ok(roster) => roster,
            Err(e) => {
                warn!(error = %e, "agent roster document is malformed");
                AgentRoster::empty_for(countries)
            }
        },
        Ok(None) => {
            debug!("no agent roster stored yet");
            AgentRoster::empty_for(countries)
        }
        Err(e) => {
            warn!(error = %e, "failed to load agent roster");
            AgentRoster::empty_for(countries)
        }
    }
}

/// Replace the stored agent roster.
pub async fn save_agents(store: &dyn DocumentStore, roster: &AgentRoster) -> Result<(), StoreError> {
    let value = serde_json::to_value(roster)?;
    store
        .put_document(AGENTS_COLLECTION, AGENTS_DOCUMENT, value)
        .await
}
