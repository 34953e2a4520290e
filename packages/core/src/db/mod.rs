//! Database Layer
//!
//! This module handles the authoritative document store:
//!
//! - Connection management with bounded startup backoff
//! - SCHEMALESS `node` table keyed by the node id
//! - Version-conditioned (compare-and-swap) lifecycle writes
//! - Bulk maintenance queries for the reconciliation jobs
//!
//! # Architecture
//!
//! SurrealDB is the only document store backend. The same code runs on the
//! in-memory engine (`mem://`), embedded RocksDB (`rocksdb://`) and a remote
//! server (`http://`), selected by the configured endpoint.
//!
//! The search index is not a database in this sense; it lives in
//! [`crate::search`] and shares only [`DatabaseError`] with this module.

mod error;
mod node_store;
mod surreal_store;

pub use error::DatabaseError;
pub use node_store::NodeStore;
pub use surreal_store::SurrealStore;
