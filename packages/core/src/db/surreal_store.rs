//! SurrealStore - NodeStore Implementation for SurrealDB
//!
//! This module implements the `NodeStore` trait on SurrealDB, the
//! authoritative document store of the registry.
//!
//! # Design Principles
//!
//! 1. **Any engine**: connects through `surrealdb::engine::any`, so the same
//!    code serves `mem://` (tests), `rocksdb://` (single host) and
//!    `http(s)://` (remote cluster) endpoints
//! 2. **SCHEMALESS table**: one `node` table, record ids `node:<sha256>`
//! 3. **Store-owned versions**: every write computes `version` inside the
//!    statement itself, so concurrent writers cannot lose increments
//! 4. **Compare-and-swap**: conditional writes carry `WHERE version = $version`
//!    and report an empty result as "no match", never as an error
//!
//! # Examples
//!
//! ```rust,no_run
//! use murmur_core::db::{NodeStore, SurrealStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SurrealStore::connect_in_memory().await?;
//!     let node = store.get_by_id("0000").await;
//!     assert!(node.is_err());
//!     Ok(())
//! }
//! ```

use crate::backoff::{retry_with_backoff, BackoffPolicy};
use crate::config::StoreConfig;
use crate::db::{DatabaseError, NodeStore};
use crate::models::{ErrorObject, Node, NodeStatus};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use surrealdb::engine::any::{self, Any};
use surrealdb::opt::auth::Root;
use surrealdb::Surreal;

const TABLE: &str = "node";

/// Internal struct matching the stored record, with the id kept in `uuid`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurrealNode {
    uuid: String,
    profile_url: String,
    #[serde(default)]
    profile_hash: Option<String>,
    status: NodeStatus,
    #[serde(default)]
    last_updated: Option<i64>,
    #[serde(default)]
    failure_reasons: Vec<ErrorObject>,
    #[serde(default)]
    version: Option<i64>,
    created_at: i64,
    #[serde(default)]
    expires: Option<i64>,
}

impl From<SurrealNode> for Node {
    fn from(sn: SurrealNode) -> Self {
        Node {
            id: sn.uuid,
            profile_url: sn.profile_url,
            profile_hash: sn.profile_hash,
            status: sn.status,
            last_updated: sn.last_updated,
            failure_reasons: sn.failure_reasons,
            version: sn.version,
            created_at: sn.created_at,
            expires: sn.expires,
        }
    }
}

/// SurrealStore implements NodeStore on any SurrealDB engine
#[derive(Clone)]
pub struct SurrealStore {
    db: Arc<Surreal<Any>>,
}

impl SurrealStore {
    /// Connect using store configuration, retrying with bounded backoff
    ///
    /// # Errors
    ///
    /// `DatabaseError::ConnectionFailed` once the backoff budget is spent.
    /// Callers treat this as fatal.
    pub async fn connect(config: &StoreConfig, policy: &BackoffPolicy) -> Result<Self, DatabaseError> {
        let db = retry_with_backoff(policy, "Connecting to document store", || {
            Self::open(config)
        })
        .await?;

        let db = Arc::new(db);
        Self::initialize_schema(&db).await?;

        tracing::info!("Document store ready at {}", config.endpoint);
        Ok(Self { db })
    }

    /// In-memory store for tests and local runs
    pub async fn connect_in_memory() -> Result<Self, DatabaseError> {
        let config = StoreConfig {
            endpoint: "mem://".to_string(),
            ..StoreConfig::default()
        };
        let db = Arc::new(Self::open(&config).await?);
        Self::initialize_schema(&db).await?;
        Ok(Self { db })
    }

    async fn open(config: &StoreConfig) -> Result<Surreal<Any>, DatabaseError> {
        let endpoint = config.endpoint.clone();
        let db = any::connect(endpoint.clone())
            .await
            .map_err(|e| DatabaseError::connection_failed("document store", &endpoint, e))?;

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await
            .map_err(|e| DatabaseError::connection_failed("document store", &endpoint, e))?;
        }

        db.use_ns(config.namespace.clone())
            .use_db(config.database.clone())
            .await
            .map_err(|e| DatabaseError::connection_failed("document store", &endpoint, e))?;

        Ok(db)
    }

    /// Define the node table and its lookup indexes
    async fn initialize_schema(db: &Surreal<Any>) -> Result<(), DatabaseError> {
        db.query(
            "
            DEFINE TABLE IF NOT EXISTS node SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS node_status ON TABLE node COLUMNS status;
            DEFINE INDEX IF NOT EXISTS node_created_at ON TABLE node COLUMNS created_at;
            ",
        )
        .await
        .and_then(|response| response.check())
        .map_err(DatabaseError::query("Failed to initialize node table"))?;

        Ok(())
    }

    fn first_version(records: Vec<SurrealNode>) -> Option<i64> {
        records.into_iter().next().map(|r| r.version.unwrap_or(0))
    }
}

#[async_trait]
impl NodeStore for SurrealStore {
    async fn add(&self, node: &Node) -> Result<i64, DatabaseError> {
        let query = "
            UPSERT type::thing($table, $id) SET
                uuid = $id,
                profile_url = $profile_url,
                profile_hash = $profile_hash ?? profile_hash,
                status = $status,
                last_updated = $last_updated,
                failure_reasons = $failure_reasons,
                expires = $expires,
                created_at = created_at ?? $created_at,
                version = (version ?? -1) + 1
            RETURN AFTER;
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("table", TABLE))
            .bind(("id", node.id.clone()))
            .bind(("profile_url", node.profile_url.clone()))
            .bind(("profile_hash", node.profile_hash.clone()))
            .bind(("status", node.status.as_str()))
            .bind(("last_updated", node.last_updated))
            .bind(("failure_reasons", node.failure_reasons.clone()))
            .bind(("expires", node.expires))
            .bind(("created_at", node.created_at))
            .await
            .map_err(DatabaseError::query("Failed to upsert node"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read upserted node"))?;

        Self::first_version(records).ok_or_else(|| {
            DatabaseError::unexpected_response(format!("Upsert of node {} returned no record", node.id))
        })
    }

    async fn get_by_id(&self, id: &str) -> Result<Node, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing($table, $id);")
            .bind(("table", TABLE))
            .bind(("id", id.to_string()))
            .await
            .map_err(DatabaseError::query("Failed to query node by id"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to extract node"))?;

        records
            .into_iter()
            .next()
            .map(Into::into)
            .ok_or_else(|| DatabaseError::not_found(id))
    }

    async fn update(&self, node: &Node) -> Result<Option<i64>, DatabaseError> {
        let set_clause = "
                status = $status,
                profile_hash = $profile_hash,
                last_updated = $last_updated,
                failure_reasons = $failure_reasons,
                expires = $expires,
                version = (version ?? -1) + 1";

        let query = match node.version {
            Some(_) => format!(
                "UPDATE type::thing($table, $id) SET {} WHERE version = $version RETURN AFTER;",
                set_clause
            ),
            None => format!(
                "UPDATE type::thing($table, $id) SET {} RETURN AFTER;",
                set_clause
            ),
        };

        let mut response = self
            .db
            .query(query)
            .bind(("table", TABLE))
            .bind(("id", node.id.clone()))
            .bind(("status", node.status.as_str()))
            .bind(("profile_hash", node.profile_hash.clone()))
            .bind(("last_updated", node.last_updated))
            .bind(("failure_reasons", node.failure_reasons.clone()))
            .bind(("expires", node.expires))
            .bind(("version", node.version))
            .await
            .map_err(DatabaseError::query("Failed to update node"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read updated node"))?;

        let applied = Self::first_version(records);
        if applied.is_none() {
            tracing::debug!(
                "Update of node {} at version {:?} matched nothing",
                node.id,
                node.version
            );
        }
        Ok(applied)
    }

    async fn soft_delete(&self, id: &str) -> Result<Option<i64>, DatabaseError> {
        let query = "
            UPDATE type::thing($table, $id) SET
                status = $status,
                last_updated = $now,
                failure_reasons = [],
                version = (version ?? -1) + 1
            RETURN AFTER;
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("table", TABLE))
            .bind(("id", id.to_string()))
            .bind(("status", NodeStatus::Deleted.as_str()))
            .bind(("now", Utc::now().timestamp()))
            .await
            .map_err(DatabaseError::query("Failed to soft delete node"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read soft deleted node"))?;

        Ok(Self::first_version(records))
    }

    async fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        let mut response = self
            .db
            .query("DELETE type::thing($table, $id) RETURN BEFORE;")
            .bind(("table", TABLE))
            .bind(("id", id.to_string()))
            .await
            .map_err(DatabaseError::query("Failed to delete node"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read deleted node"))?;

        Ok(!records.is_empty())
    }

    async fn find_by_statuses(
        &self,
        statuses: &[NodeStatus],
        start: usize,
        limit: usize,
    ) -> Result<Vec<Node>, DatabaseError> {
        let statuses: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
        let query = "
            SELECT * FROM node
            WHERE status IN $statuses
            ORDER BY created_at ASC, uuid ASC
            LIMIT $limit START $start;
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("statuses", statuses))
            .bind(("limit", limit as i64))
            .bind(("start", start as i64))
            .await
            .map_err(DatabaseError::query("Failed to find nodes by status"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to extract nodes by status"))?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn remove_by_created_at(
        &self,
        status: NodeStatus,
        before: i64,
    ) -> Result<usize, DatabaseError> {
        let mut response = self
            .db
            .query("DELETE node WHERE status = $status AND created_at <= $before RETURN BEFORE;")
            .bind(("status", status.as_str()))
            .bind(("before", before))
            .await
            .map_err(DatabaseError::query("Failed to remove nodes by created_at"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read removed nodes"))?;

        Ok(records.len())
    }

    async fn remove_by_last_updated(
        &self,
        status: NodeStatus,
        before: i64,
    ) -> Result<Vec<String>, DatabaseError> {
        let query = "
            DELETE node
            WHERE status = $status
                AND last_updated != NONE AND last_updated != NULL
                AND last_updated <= $before
            RETURN BEFORE;
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("status", status.as_str()))
            .bind(("before", before))
            .await
            .map_err(DatabaseError::query("Failed to remove nodes by last_updated"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read removed nodes"))?;

        Ok(records.into_iter().map(|r| r.uuid).collect())
    }

    async fn update_status_by_expiration(
        &self,
        from: NodeStatus,
        now: i64,
    ) -> Result<Vec<String>, DatabaseError> {
        let query = "
            UPDATE node SET
                status = $deleted,
                last_updated = $now,
                failure_reasons = [],
                version = (version ?? -1) + 1
            WHERE status = $from
                AND expires != NONE AND expires != NULL
                AND expires <= $now
            RETURN AFTER;
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("deleted", NodeStatus::Deleted.as_str()))
            .bind(("from", from.as_str()))
            .bind(("now", now))
            .await
            .map_err(DatabaseError::query("Failed to expire nodes"))?;

        let records: Vec<SurrealNode> = response
            .take(0)
            .map_err(DatabaseError::query("Failed to read expired nodes"))?;

        Ok(records.into_iter().map(|r| r.uuid).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    async fn create_test_store() -> Result<SurrealStore> {
        Ok(SurrealStore::connect_in_memory().await?)
    }

    fn received(url: &str, created_at: i64) -> Node {
        let mut node = Node::new(url);
        node.created_at = created_at;
        node
    }

    #[tokio::test]
    async fn test_add_inserts_with_version_zero() -> Result<()> {
        let store = create_test_store().await?;
        let node = Node::new("https://example.org/a.json");

        let version = store.add(&node).await?;
        assert_eq!(version, 0);

        let stored = store.get_by_id(&node.id).await?;
        assert_eq!(stored.profile_url, node.profile_url);
        assert_eq!(stored.status, NodeStatus::Received);
        assert_eq!(stored.version, Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_add_existing_increments_version_and_keeps_created_at() -> Result<()> {
        let store = create_test_store().await?;
        let first = received("https://example.org/a.json", 1_000);
        store.add(&first).await?;

        let second = received("https://example.org/a.json", 2_000);
        let version = store.add(&second).await?;
        assert_eq!(version, 1);

        let stored = store.get_by_id(&first.id).await?;
        assert_eq!(stored.created_at, 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_add_keeps_profile_hash() -> Result<()> {
        let store = create_test_store().await?;
        let mut node = Node::new("https://example.org/a.json");
        let v = store.add(&node).await?;
        node.set_version(Some(v))
            .set_status(NodeStatus::Posted)
            .set_profile_hash(Some("abc123".to_string()))
            .set_last_updated(Some(10));
        store.update(&node).await?;

        let resubmitted = Node::new("https://example.org/a.json");
        store.add(&resubmitted).await?;

        let stored = store.get_by_id(&node.id).await?;
        assert_eq!(stored.status, NodeStatus::Received);
        assert_eq!(stored.profile_hash.as_deref(), Some("abc123"));
        assert_eq!(stored.last_updated, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_missing_node_is_not_found() -> Result<()> {
        let store = create_test_store().await?;
        let err = store.get_by_id("missing").await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_conditional_update_with_stale_version_is_noop() -> Result<()> {
        let store = create_test_store().await?;
        let mut node = Node::new("https://example.org/a.json");
        let v0 = store.add(&node).await?;

        node.set_version(Some(v0)).set_status(NodeStatus::Posted);
        assert_eq!(store.update(&node).await?, Some(v0 + 1));

        // Same version again: someone already moved the record forward
        node.set_status(NodeStatus::PostFailed);
        assert_eq!(store.update(&node).await?, None);

        let stored = store.get_by_id(&node.id).await?;
        assert_eq!(stored.status, NodeStatus::Posted);
        assert_eq!(stored.version, Some(v0 + 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_unconditional_update_always_applies() -> Result<()> {
        let store = create_test_store().await?;
        let mut node = Node::new("https://example.org/a.json");
        store.add(&node).await?;

        node.set_version(None).set_status(NodeStatus::PostFailed);
        assert_eq!(store.update(&node).await?, Some(1));
        assert_eq!(store.update(&node).await?, Some(2));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_record_is_noop() -> Result<()> {
        let store = create_test_store().await?;
        let node = Node::new("https://example.org/never-added.json");
        assert_eq!(store.update(&node).await?, None);
        assert!(store.get_by_id(&node.id).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_delete_marks_deleted_and_bumps_version() -> Result<()> {
        let store = create_test_store().await?;
        let mut node = Node::new("https://example.org/a.json");
        let v0 = store.add(&node).await?;

        let v1 = store.soft_delete(&node.id).await?;
        assert_eq!(v1, Some(v0 + 1));

        let stored = store.get_by_id(&node.id).await?;
        assert_eq!(stored.status, NodeStatus::Deleted);
        assert!(stored.last_updated.is_some());

        // A validation outcome computed against v0 can no longer land
        node.set_version(Some(v0)).set_status(NodeStatus::Posted);
        assert_eq!(store.update(&node).await?, None);
        assert_eq!(store.get_by_id(&node.id).await?.status, NodeStatus::Deleted);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_record() -> Result<()> {
        let store = create_test_store().await?;
        let node = Node::new("https://example.org/a.json");
        store.add(&node).await?;

        assert!(store.delete(&node.id).await?);
        assert!(!store.delete(&node.id).await?);
        assert!(store.get_by_id(&node.id).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_statuses_pages_in_creation_order() -> Result<()> {
        let store = create_test_store().await?;
        for i in 0..5 {
            store
                .add(&received(&format!("https://example.org/{}.json", i), 100 + i))
                .await?;
        }
        let mut posted = received("https://example.org/posted.json", 50);
        let v = store.add(&posted).await?;
        posted.set_version(Some(v)).set_status(NodeStatus::Posted);
        store.update(&posted).await?;

        let statuses = [NodeStatus::Received, NodeStatus::PostFailed];
        let first = store.find_by_statuses(&statuses, 0, 2).await?;
        let second = store.find_by_statuses(&statuses, 2, 2).await?;
        let third = store.find_by_statuses(&statuses, 4, 2).await?;

        let urls: Vec<String> = first
            .iter()
            .chain(second.iter())
            .chain(third.iter())
            .map(|n| n.profile_url.clone())
            .collect();
        assert_eq!(
            urls,
            (0..5)
                .map(|i| format!("https://example.org/{}.json", i))
                .collect::<Vec<_>>()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_by_created_at_only_touches_status() -> Result<()> {
        let store = create_test_store().await?;
        let mut failed = received("https://example.org/failed.json", 100);
        let v = store.add(&failed).await?;
        failed
            .set_version(Some(v))
            .set_status(NodeStatus::ValidationFailed)
            .set_failure_reasons(vec![ErrorObject::bad_request("Bad", "bad")]);
        store.update(&failed).await?;

        let fresh = received("https://example.org/fresh.json", 100);
        store.add(&fresh).await?;

        let removed = store
            .remove_by_created_at(NodeStatus::ValidationFailed, 200)
            .await?;
        assert_eq!(removed, 1);
        assert!(store.get_by_id(&failed.id).await.is_err());
        assert!(store.get_by_id(&fresh.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_by_last_updated_respects_cutoff() -> Result<()> {
        let store = create_test_store().await?;
        let old = Node::new("https://example.org/old.json");
        let recent = Node::new("https://example.org/recent.json");
        for (node, last_updated) in [(&old, 100), (&recent, 900)] {
            store.add(node).await?;
            let mut deleted = node.clone();
            deleted
                .set_status(NodeStatus::Deleted)
                .set_last_updated(Some(last_updated));
            store.update(&deleted).await?;
        }

        let removed = store.remove_by_last_updated(NodeStatus::Deleted, 500).await?;
        assert_eq!(removed, vec![old.id.clone()]);
        assert!(store.get_by_id(&recent.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_by_expiration() -> Result<()> {
        let store = create_test_store().await?;
        let mut expired = Node::new("https://example.org/expired.json");
        let mut future = Node::new("https://example.org/future.json");
        let mut forever = Node::new("https://example.org/forever.json");
        for (node, expires) in [(&mut expired, Some(100)), (&mut future, Some(10_000)), (&mut forever, None)] {
            store.add(node).await?;
            node.set_status(NodeStatus::Posted)
                .set_last_updated(Some(1))
                .set_expires(expires);
            store.update(node).await?;
        }

        let ids = store
            .update_status_by_expiration(NodeStatus::Posted, 500)
            .await?;
        assert_eq!(ids, vec![expired.id.clone()]);
        assert_eq!(store.get_by_id(&expired.id).await?.status, NodeStatus::Deleted);
        assert_eq!(store.get_by_id(&future.id).await?.status, NodeStatus::Posted);
        assert_eq!(store.get_by_id(&forever.id).await?.status, NodeStatus::Posted);
        Ok(())
    }

    #[tokio::test]
    async fn test_rocksdb_engine_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config = StoreConfig {
            endpoint: format!("rocksdb://{}", temp_dir.path().join("store").display()),
            ..StoreConfig::default()
        };
        let store = SurrealStore::connect(&config, &BackoffPolicy::default()).await?;

        let node = Node::new("https://example.org/a.json");
        assert_eq!(store.add(&node).await?, 0);
        assert_eq!(store.get_by_id(&node.id).await?.profile_url, node.profile_url);
        Ok(())
    }
}
