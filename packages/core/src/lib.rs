//! Murmur Index Core
//!
//! This crate provides the node lifecycle and dual-store consistency engine
//! of the Murmur index: a public registry of nodes, each pointing at an
//! externally hosted JSON profile.
//!
//! # Architecture
//!
//! - **Authoritative store**: SurrealDB holds every node record and owns its
//!   `version` counter
//! - **Search projection**: the search index holds enriched profile documents
//!   keyed by the same node id, rebuilt idempotently from the store
//! - **Optimistic concurrency**: forward transitions are compare-and-swap
//!   writes on `version`; a lost race is a no-op, not an error
//! - **At-least-once messaging**: outcomes arrive over a queue-group bus and
//!   are acknowledged only after their transition committed
//! - **Reconciliation**: periodic jobs expire, purge and re-drive nodes
//!
//! # Modules
//!
//! - [`models`] - Node record, lifecycle status, error objects
//! - [`db`] - document store repository (SurrealDB)
//! - [`search`] - search index repository, query builder, pagination
//! - [`events`] - message bus, outcome listeners, validation worker
//! - [`services`] - `NodeService` orchestration and collaborators
//! - [`jobs`] - reconciliation sweeps and their scheduler
//! - [`config`] - layered configuration
//! - [`backoff`] - bounded exponential backoff for startup connections

pub mod backoff;
pub mod config;
pub mod db;
pub mod events;
pub mod jobs;
pub mod models;
pub mod search;
pub mod services;

// Re-export commonly used types
pub use config::MurmurConfig;
pub use models::*;
pub use services::{NodeService, NodeServiceDeps, NodeServiceError};
