//! In-process document store.
//!
//! Backs offline development (`--in-memory`) and the engine tests. Commits
//! run the mutator while holding the document's shard lock, which gives the
//! same read-modify-write atomicity the remote store provides.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::store::{DocumentStore, Mutator};
use crate::StoreError;

type DocKey = (String, String);

/// Thread-safe in-memory document store with failure injection.
#[derive(Default)]
pub struct MemoryStore {
    docs: DashMap<DocKey, Value>,
    /// Number of upcoming calls that should fail.
    fail_next: AtomicUsize,
    /// Fail every call while set.
    failing: AtomicBool,
    /// Artificial latency applied to every call, in milliseconds.
    latency_ms: AtomicU64,
    /// Start time of every commit call, successful or not.
    commit_log: Mutex<Vec<Instant>>,
    /// Number of commits that wrote a document.
    commits_applied: AtomicUsize,
    /// Number of load calls.
    loads: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document.
    pub fn with_document(self, collection: &str, id: &str, value: Value) -> Self {
        self.docs.insert(key(collection, id), value);
        self
    }

    /// Overwrite a document directly, bypassing failure injection.
    pub fn set_document(&self, collection: &str, id: &str, value: Value) {
        self.docs.insert(key(collection, id), value);
    }

    /// Read a document without going through the async interface.
    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.docs.get(&key(collection, id)).map(|v| v.clone())
    }

    /// All documents in a collection, keyed by id.
    pub fn documents_in(&self, collection: &str) -> Vec<(String, Value)> {
        let mut docs: Vec<_> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == collection)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }

    /// Make the next `n` calls fail with a transient error.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Make every call fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Start times of every commit call made so far.
    pub fn commit_attempts(&self) -> Vec<Instant> {
        self.commit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of commits that actually wrote a document.
    pub fn commits_applied(&self) -> usize {
        self.commits_applied.load(Ordering::SeqCst)
    }

    /// Number of load calls made so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    async fn enter(&self, op: &'static str) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let injected = self.failing.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if injected {
            trace!(op, "injected store failure");
            return Err(StoreError::Unavailable {
                status: 503,
                message: format!("injected failure in {}", op),
            });
        }
        Ok(())
    }
}

fn key(collection: &str, id: &str) -> DocKey {
    (collection.to_string(), id.to_string())
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_document(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.enter("load_document").await?;
        Ok(self.document(collection, id))
    }

    async fn commit_document(
        &self,
        collection: &str,
        id: &str,
        mutator: Mutator<'_>,
    ) -> Result<Value, StoreError> {
        self.commit_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());
        self.enter("commit_document").await?;

        let written = match self.docs.entry(key(collection, id)) {
            Entry::Occupied(mut entry) => {
                let next = mutator(Some(entry.get().clone()))?;
                entry.insert(next.clone());
                next
            }
            Entry::Vacant(entry) => {
                let next = mutator(None)?;
                entry.insert(next.clone());
                next
            }
        };

        self.commits_applied.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    async fn put_document(&self, collection: &str, id: &str, value: Value) -> Result<(), StoreError> {
        self.enter("put_document").await?;
        self.docs.insert(key(collection, id), value);
        Ok(())
    }
}
