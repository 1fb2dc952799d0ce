//! Client-side sync cache for shift tables.
//!
//! [`SyncEngine`] keeps one validated in-memory snapshot per process and
//! pushes local changes to a [`DocumentStore`](shiftdesk_store::DocumentStore)
//! with a per-record merge inside the store's atomic commit. Progress is
//! reported through a [`StatusBroadcaster`].

mod config;
pub mod engine;
mod error;
pub mod status;

pub use config::SyncConfig;
pub use engine::{EngineHealth, SyncEngine, SyncOutcome, SyncPhase};
pub use error::EngineError;
pub use status::{StatusBroadcaster, StatusCallback, StatusStream, Subscription, SyncStatus};
