//! Shift table documents and the remote store they live in.
//!
//! This crate holds everything about shift tables that does not depend on the
//! sync engine's lifecycle: the record types, the shape contract, the
//! per-record merge policy, and the document store seam with its adapters.
//!
//! ## Features
//!
//! - **Types**: shift tables, snapshots and the agent roster
//! - **Validation**: shape checks with per-record diagnostics
//! - **Merge**: newest-wins reconciliation with lifecycle overrides
//! - **Stores**: HTTP client for a versioned document store, and an in-memory
//!   store for offline use and tests

pub mod client;
mod error;
pub mod memory;
mod merge;
mod path;
mod records;
pub mod store;
mod types;
mod validate;

pub use client::HttpDocumentStore;
pub use error::{PathError, RecordField, StoreError, ValidationError};
pub use memory::MemoryStore;
pub use merge::{merge, merge_checked};
pub use path::set_at_path;
pub use records::*;
pub use store::{DocumentStore, Mutator, load_agents, save_agents};
pub use types::*;
pub use validate::Validator;
