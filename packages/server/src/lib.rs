//! Murmur Index Server
//!
//! HTTP API over the index core plus the wiring used by the `index-server`
//! and `reconcile` binaries.

pub mod api;
pub mod bootstrap;

pub use api::{create_router, start_server, AppState};
pub use bootstrap::{init_tracing, Runtime};
