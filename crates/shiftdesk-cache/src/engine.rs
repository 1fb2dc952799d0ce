//! Write-through sync engine for the shift table snapshot.
//!
//! The engine owns the only in-memory copy of the snapshot. Local writes are
//! validated, applied immediately, and pushed to the document store by a
//! merge-and-commit cycle:
//!
//! - whole-snapshot replacement syncs immediately
//! - path updates sync after a debounce window
//! - a periodic tick retries anything still dirty
//!
//! At most one cycle runs at a time. A cycle always pushes the snapshot as it
//! is when the cycle starts, so rapid writes coalesce into one commit.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use backoff::backoff::Backoff;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use shiftdesk_store::{
    DocumentStore, Snapshot, StoreError, ValidationError, Validator, merge_checked, now_millis,
    set_at_path,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::status::{StatusBroadcaster, StatusStream, Subscription, SyncStatus};
use crate::{EngineError, SyncConfig};

/// Lifecycle phase of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SyncPhase {
    /// Not yet seeded from the store.
    Uninitialized = 0,
    /// Initial load in progress.
    Loading = 1,
    /// Ready. Local changes may still be pending, see [`SyncEngine::is_dirty`].
    Idle = 2,
    /// A merge-and-commit cycle is in flight.
    Syncing = 3,
    /// The last cycle gave up. Local changes are kept and retried later.
    Error = 4,
}

impl From<u8> for SyncPhase {
    fn from(v: u8) -> Self {
        match v {
            1 => SyncPhase::Loading,
            2 => SyncPhase::Idle,
            3 => SyncPhase::Syncing,
            4 => SyncPhase::Error,
            _ => SyncPhase::Uninitialized,
        }
    }
}

/// Result of a write that triggers a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The store holds the current snapshot (or there was nothing to push).
    Synced,
    /// Another cycle was in flight; the change stays pending.
    Deferred,
}

/// Point-in-time view of the engine for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub phase: SyncPhase,
    pub dirty: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_modified: Option<i64>,
    pub tables: usize,
}

struct CacheState {
    snapshot: Snapshot,
    dirty: bool,
    /// Bumped on every local write so a cycle can tell if it went stale.
    revision: u64,
    last_modified: Option<i64>,
    last_synced: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

struct Ticker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Releases the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Client-side cache of the snapshot, kept in sync with a [`DocumentStore`].
pub struct SyncEngine {
    store: Arc<dyn DocumentStore>,
    config: SyncConfig,
    validator: Validator,
    state: Mutex<CacheState>,
    phase: AtomicU8,
    syncing: AtomicBool,
    status: StatusBroadcaster,
    debounce: Mutex<Option<JoinHandle<()>>>,
    ticker: Mutex<Option<Ticker>>,
    this: Weak<SyncEngine>,
}

impl SyncEngine {
    /// Create an engine with an empty snapshot. Call [`initialize`](Self::initialize)
    /// to seed it from the store and [`start`](Self::start) for periodic syncs.
    pub fn new(store: Arc<dyn DocumentStore>, config: SyncConfig) -> Arc<Self> {
        let validator = config.validator();
        Arc::new_cyclic(|this| Self {
            store,
            config,
            validator,
            state: Mutex::new(CacheState {
                snapshot: Snapshot::default(),
                dirty: false,
                revision: 0,
                last_modified: None,
                last_synced: None,
                last_error: None,
            }),
            phase: AtomicU8::new(SyncPhase::Uninitialized as u8),
            syncing: AtomicBool::new(false),
            status: StatusBroadcaster::new(),
            debounce: Mutex::new(None),
            ticker: Mutex::new(None),
            this: this.clone(),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The backing document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Current snapshot. Always valid.
    pub fn snapshot(&self) -> Snapshot {
        self.lock_state().snapshot.clone()
    }

    /// Whether local changes are waiting to be pushed.
    pub fn is_dirty(&self) -> bool {
        self.lock_state().dirty
    }

    /// Whether a cycle is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> SyncPhase {
        SyncPhase::from(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: SyncPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Milliseconds since epoch of the last accepted write, load or sync.
    pub fn last_modified(&self) -> Option<i64> {
        self.lock_state().last_modified
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_synced
    }

    /// Status as subscribers see it.
    pub fn status(&self) -> SyncStatus {
        let state = self.lock_state();
        let phase = self.phase();
        SyncStatus {
            is_syncing: phase == SyncPhase::Syncing,
            last_synced: state.last_synced,
            error: if phase == SyncPhase::Error {
                state.last_error.clone()
            } else {
                None
            },
        }
    }

    pub fn health(&self) -> EngineHealth {
        let state = self.lock_state();
        EngineHealth {
            phase: self.phase(),
            dirty: state.dirty,
            last_synced: state.last_synced,
            last_modified: state.last_modified,
            tables: state.snapshot.len(),
        }
    }

    fn publish(&self) {
        self.status.notify(self.status());
    }

    /// Register a status callback. It receives the current status right away.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    /// Status updates as a stream, starting with the current status.
    pub fn status_stream(&self) -> StatusStream {
        self.status.stream()
    }

    /// Number of live status subscriptions, streams included.
    pub fn subscriber_count(&self) -> usize {
        self.status.subscriber_count()
    }

    /// Seed the snapshot from the store.
    ///
    /// Falls back to an empty snapshot when the document is missing, invalid,
    /// or the store stays unreachable. Never fails.
    #[tracing::instrument(skip(self))]
    pub async fn initialize(&self) {
        self.set_phase(SyncPhase::Loading);

        let collection = self.config.collection.as_str();
        let document_id = self.config.document_id.as_str();
        let store = &self.store;
        let loaded = self
            .with_retry("load", move || async move {
                store
                    .load_document(collection, document_id)
                    .await
                    .map_err(EngineError::from)
            })
            .await;

        let (snapshot, synced) = match loaded {
            Ok(Some(value)) => match self.validator.parse(value) {
                Ok(snapshot) => (snapshot.without_deleted(), true),
                Err(e) => {
                    error!(error = %e, "stored snapshot is invalid, starting empty");
                    (Snapshot::default(), false)
                }
            },
            Ok(None) => {
                info!("no stored snapshot, starting empty");
                (Snapshot::default(), false)
            }
            Err(e) => {
                error!(error = %e, "failed to load snapshot, starting empty");
                (Snapshot::default(), false)
            }
        };

        let tables = snapshot.len();
        {
            let mut state = self.lock_state();
            state.snapshot = snapshot;
            state.dirty = false;
            state.revision += 1;
            state.last_modified = Some(now_millis());
            state.last_synced = synced.then(Utc::now);
            state.last_error = None;
        }
        self.set_phase(SyncPhase::Idle);
        info!(tables, "snapshot cache initialized");
        self.publish();
    }

    fn apply_local(&self, snapshot: Snapshot) {
        let mut state = self.lock_state();
        state.snapshot = snapshot;
        state.dirty = true;
        state.revision += 1;
        state.last_modified = Some(now_millis());
    }

    /// Replace the whole snapshot and sync it right away.
    ///
    /// A candidate failing validation is rejected and leaves the cache
    /// untouched. A failed sync keeps the new snapshot locally and pending.
    #[tracing::instrument(skip(self, candidate))]
    pub async fn set_snapshot(&self, candidate: Value) -> Result<SyncOutcome, EngineError> {
        let mut snapshot = self.validator.parse(candidate)?;
        let edited = self.stamp_edits(&mut snapshot);
        debug!(tables = snapshot.len(), edited, "accepted snapshot replacement");
        self.apply_local(snapshot);
        self.sync_cycle(false).await
    }

    /// Give every new or changed record a timestamp newer than its cached
    /// version, so the edit wins the next merge. Unchanged records keep the
    /// cached timestamp. Returns the number of records stamped.
    fn stamp_edits(&self, snapshot: &mut Snapshot) -> usize {
        let state = self.lock_state();
        let now = now_millis();
        let mut edited = 0;

        for table in &mut snapshot.tables {
            match state.snapshot.get(&table.id) {
                Some(cached) if cached.same_content(table) => {
                    table.last_modified = cached.last_modified.or(table.last_modified);
                }
                Some(cached) => {
                    table.last_modified = Some(now.max(cached.modified_at() + 1));
                    edited += 1;
                }
                None => {
                    table.last_modified = Some(now.max(table.modified_at()));
                    edited += 1;
                }
            }
        }
        edited
    }

    /// Set a single nested value and schedule a debounced sync.
    ///
    /// The whole resulting snapshot is validated before anything changes.
    pub fn update_at_path<S: AsRef<str>>(&self, path: &[S], value: Value) -> Result<(), EngineError> {
        let mut document = self.snapshot().to_value()?;
        set_at_path(&mut document, path, value)?;
        let mut snapshot = self.validator.parse(document)?;

        // An edited record must win the next merge against its stored version.
        if let Some(table) = edited_record(path).and_then(|i| snapshot.tables.get_mut(i)) {
            table.touch();
        }

        self.apply_local(snapshot);
        self.schedule_debounced_sync();
        Ok(())
    }

    /// Run a cycle now, even if nothing is pending.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self) -> Result<SyncOutcome, EngineError> {
        self.sync_cycle(true).await
    }

    /// Reset to an empty snapshot and sync.
    ///
    /// The previous snapshot is restored if the sync fails. Records that only
    /// exist remotely come back through the merge.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self) -> Result<SyncOutcome, EngineError> {
        let (backup, was_dirty, revision) = {
            let mut state = self.lock_state();
            let backup = std::mem::take(&mut state.snapshot);
            let was_dirty = state.dirty;
            state.dirty = true;
            state.revision += 1;
            state.last_modified = Some(now_millis());
            (backup, was_dirty, state.revision)
        };

        let result = self.sync_cycle(false).await;
        if result.is_err() {
            let mut state = self.lock_state();
            if state.revision == revision {
                state.snapshot = backup;
                state.dirty = was_dirty;
                state.revision += 1;
                warn!("restored previous snapshot after failed clear");
            }
        }
        result
    }

    /// Start the periodic sync tick. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.is_some() {
            debug!("periodic sync already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let engine = self.this.clone();
        let period = self.config.sync_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let Some(engine) = engine.upgrade() else {
                            break;
                        };
                        if engine.is_dirty() && !engine.is_syncing() {
                            debug!("periodic sync tick");
                            // Failures are already logged and published.
                            let _ = engine.sync_cycle(false).await;
                        }
                    }
                }
            }
            debug!("periodic sync stopped");
        });

        *ticker = Some(Ticker { shutdown, handle });
        info!(interval_secs = period.as_secs(), "periodic sync started");
    }

    /// Stop the periodic tick and cancel a pending debounce timer.
    ///
    /// A cycle already in flight runs to completion.
    pub fn stop(&self) {
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = ticker.shutdown.send(true);
            drop(ticker.handle);
            info!("periodic sync stopped");
        }

        if let Some(timer) = self
            .debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
        }
    }

    /// Whether the periodic tick is running.
    pub fn is_running(&self) -> bool {
        self.ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// (Re)arm the debounce timer. Only the latest timer survives.
    fn schedule_debounced_sync(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, change stays pending until the next sync");
            return;
        };

        let engine = self.this.clone();
        let delay = self.config.debounce;
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Detach the cycle so rearming the timer can't cancel it midway.
            tokio::spawn(async move {
                if let Some(engine) = engine.upgrade() {
                    let _ = engine.sync_cycle(false).await;
                }
            });
        });

        let mut slot = self.debounce.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(timer) {
            previous.abort();
        }
    }

    /// One merge-and-commit cycle.
    async fn sync_cycle(&self, force: bool) -> Result<SyncOutcome, EngineError> {
        if !force && !self.is_dirty() {
            return Ok(SyncOutcome::Synced);
        }
        let Some(_in_flight) = InFlight::acquire(&self.syncing) else {
            debug!("sync already in flight, change stays pending");
            return Ok(SyncOutcome::Deferred);
        };

        self.set_phase(SyncPhase::Syncing);
        self.publish();

        let (local, revision) = {
            let state = self.lock_state();
            (state.snapshot.clone(), state.revision)
        };

        match self.push(&local).await {
            Ok(merged) => {
                let tables = merged.len();
                let still_dirty = {
                    let mut state = self.lock_state();
                    if state.revision == revision {
                        state.snapshot = merged;
                        state.dirty = false;
                    }
                    state.last_modified = Some(now_millis());
                    state.last_synced = Some(Utc::now());
                    state.last_error = None;
                    state.dirty
                };
                self.set_phase(SyncPhase::Idle);
                info!(tables, "snapshot synced");
                self.publish();

                if still_dirty {
                    debug!("snapshot changed during sync, scheduling another");
                    self.schedule_debounced_sync();
                }
                Ok(SyncOutcome::Synced)
            }
            Err(e) => {
                error!(error = %e, "snapshot sync failed");
                self.lock_state().last_error = Some(e.to_string());
                self.set_phase(SyncPhase::Error);
                self.publish();
                Err(e)
            }
        }
    }

    /// Back up soft-deleted records, then merge `local` into the stored
    /// document. Returns the snapshot that was committed.
    async fn push(&self, local: &Snapshot) -> Result<Snapshot, EngineError> {
        let store = &self.store;

        for table in local.deleted() {
            let backup_collection = self.config.backup_collection.as_str();
            let id = table.id.as_str();
            let record = serde_json::to_value(table)?;
            let record = &record;
            self.with_retry("backup", move || async move {
                store
                    .put_document(backup_collection, id, record.clone())
                    .await
                    .map_err(EngineError::from)
            })
            .await?;
            debug!(record_id = %id, "backed up soft-deleted record");
        }

        let rejected: Mutex<Option<ValidationError>> = Mutex::new(None);
        let validator = &self.validator;
        let mutator = |current: Option<Value>| -> Result<Value, StoreError> {
            let remote = match current {
                None | Some(Value::Null) => Snapshot::default(),
                Some(value) => serde_json::from_value::<Snapshot>(value)
                    .map_err(|e| StoreError::MalformedDocument(e.to_string()))?,
            };
            match merge_checked(validator, &remote, local) {
                Ok(merged) => Ok(merged.to_value()?),
                Err(e) => {
                    let reason = e.to_string();
                    *rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                    Err(StoreError::Aborted(reason))
                }
            }
        };

        let collection = self.config.collection.as_str();
        let document_id = self.config.document_id.as_str();
        let mutator = &mutator;
        let rejected = &rejected;
        let written = self
            .with_retry("commit", move || async move {
                match store.commit_document(collection, document_id, mutator).await {
                    Ok(written) => Ok(written),
                    Err(e) => {
                        let invalid = rejected
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        Err(match invalid {
                            Some(invalid) => EngineError::InvalidMerge(invalid),
                            None => EngineError::Store(e),
                        })
                    }
                }
            })
            .await?;

        Ok(serde_json::from_value(written)?)
    }

    /// Run `call` up to `max_attempts` times, bounding each call by `io_timeout`.
    ///
    /// Only transient store errors are retried. Anything else is returned
    /// after the first attempt.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let io_timeout = self.config.io_timeout;
        let mut backoff = self.config.backoff();
        let mut attempt = 1;

        loop {
            let result = match tokio::time::timeout(io_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Store(StoreError::Timeout(io_timeout))),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(EngineError::Store(e)) if e.is_transient() => e,
                Err(other) => return Err(other),
            };

            if attempt >= max_attempts {
                return Err(EngineError::RetriesExhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = backoff.next_backoff().unwrap_or(self.config.max_delay);
            warn!(
                op,
                attempt,
                max_attempts,
                backoff_ms = delay.as_millis() as u64,
                error = %err,
                "store call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Index of the table a path update edits, unless it sets the timestamp itself.
fn edited_record<S: AsRef<str>>(path: &[S]) -> Option<usize> {
    match path {
        [root, index, rest @ ..] if root.as_ref() == "tables" => {
            let sets_timestamp = matches!(rest, [field] if field.as_ref() == "lastModified");
            if sets_timestamp {
                None
            } else {
                index.as_ref().parse().ok()
            }
        }
        _ => None,
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
