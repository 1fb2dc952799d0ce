//! HTTP surface for the shift table sync cache.
//!
//! Exposes the cache to browser clients:
//! - load and save of the whole snapshot
//! - a live sync status stream (SSE)
//! - the agent roster and per-country published views
//! - a health probe

mod error;
mod routes;
mod sse;

pub use error::WebError;
pub use routes::{AppState, create_router, serve};
