//! NodeStore Trait - Document Store Abstraction
//!
//! This module defines the `NodeStore` trait for the authoritative document
//! store. `NodeService` and the reconciliation jobs depend on the trait only,
//! so the SurrealDB backend can be swapped without touching business logic.
//!
//! # Concurrency Model
//!
//! The store owns the `version` counter of every record. Writers never set
//! it; every state-changing write increments it atomically. A write issued
//! with `node.version = Some(v)` is a compare-and-swap: it is applied only if
//! the stored version is still `v`, and is silently dropped otherwise. That
//! drop is the signal that another worker already applied a newer transition.
//!
//! # Examples
//!
//! ```rust,no_run
//! use murmur_core::db::{NodeStore, SurrealStore};
//! use murmur_core::models::{Node, NodeStatus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SurrealStore::connect_in_memory().await?;
//!
//!     let mut node = Node::new("https://example.org/profile.json");
//!     let version = store.add(&node).await?;
//!     node.set_version(Some(version));
//!
//!     node.set_status(NodeStatus::Posted);
//!     let applied = store.update(&node).await?;
//!     assert_eq!(applied, Some(version + 1));
//!
//!     // Same stale version again: dropped, not an error
//!     assert_eq!(store.update(&node).await?, None);
//!     Ok(())
//! }
//! ```

use crate::db::DatabaseError;
use crate::models::{Node, NodeStatus};
use async_trait::async_trait;

/// Abstraction layer for node persistence in the authoritative store
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// API request worker, bus listener and reconciliation job.
///
/// # Method Categories
///
/// - **Lifecycle writes**: `add`, `update`, `soft_delete`, `delete`
/// - **Reads**: `get_by_id`, `find_by_statuses`
/// - **Bulk maintenance**: `remove_by_created_at`, `remove_by_last_updated`,
///   `update_status_by_expiration` (reconciliation jobs only)
#[async_trait]
pub trait NodeStore: Send + Sync {
    //
    // LIFECYCLE WRITES
    //

    /// Upsert a node by `id`
    ///
    /// Inserts with `version = 0` when the record does not exist. When it
    /// exists, overwrites the lifecycle fields and increments `version` in
    /// the same write. `created_at` is only written on insert.
    ///
    /// # Returns
    ///
    /// The post-write version, so the caller's in-memory record stays
    /// consistent with the store.
    async fn add(&self, node: &Node) -> Result<i64, DatabaseError>;

    /// Get node by ID
    ///
    /// # Errors
    ///
    /// `DatabaseError::NotFound` when no record has this id.
    async fn get_by_id(&self, id: &str) -> Result<Node, DatabaseError>;

    /// Write the lifecycle fields of a node
    ///
    /// Writes `status`, `profile_hash`, `last_updated`, `failure_reasons`
    /// and `expires`.
    ///
    /// - `node.version = Some(v)`: applied only if the stored version is `v`
    /// - `node.version = None`: unconditional
    ///
    /// # Returns
    ///
    /// `Some(new_version)` when the write was applied, `None` when no record
    /// matched (lost race or missing record). `None` is not an error.
    async fn update(&self, node: &Node) -> Result<Option<i64>, DatabaseError>;

    /// Flip a node to `deleted` with `last_updated = now`
    ///
    /// Unconditional: it wins over any concurrent validation outcome and
    /// bumps the version so that outcome's conditional write is dropped.
    ///
    /// # Returns
    ///
    /// The new version, or `None` if the record does not exist.
    async fn soft_delete(&self, id: &str) -> Result<Option<i64>, DatabaseError>;

    /// Remove a node permanently
    ///
    /// # Returns
    ///
    /// `true` if a record was removed.
    async fn delete(&self, id: &str) -> Result<bool, DatabaseError>;

    //
    // READS
    //

    /// Page through nodes whose status is one of `statuses`
    ///
    /// Ordered by `(created_at, id)` so repeated calls with an advancing
    /// `start` walk a stable sequence.
    async fn find_by_statuses(
        &self,
        statuses: &[NodeStatus],
        start: usize,
        limit: usize,
    ) -> Result<Vec<Node>, DatabaseError>;

    //
    // BULK MAINTENANCE
    //

    /// Remove nodes with `status` whose `created_at <= before`
    ///
    /// Returns the number of removed records.
    async fn remove_by_created_at(
        &self,
        status: NodeStatus,
        before: i64,
    ) -> Result<usize, DatabaseError>;

    /// Remove nodes with `status` whose `last_updated <= before`
    ///
    /// Returns the ids of removed records.
    async fn remove_by_last_updated(
        &self,
        status: NodeStatus,
        before: i64,
    ) -> Result<Vec<String>, DatabaseError>;

    /// Transition `from`-status nodes with `expires <= now` to `deleted`
    ///
    /// Unconditional bulk write. Returns the ids of transitioned records so
    /// the caller can mirror the change into the search index.
    async fn update_status_by_expiration(
        &self,
        from: NodeStatus,
        now: i64,
    ) -> Result<Vec<String>, DatabaseError>;
}
