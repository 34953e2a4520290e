//! Expiration and retention sweeps

use crate::config::TtlConfig;
use crate::db::NodeStore;
use crate::jobs::{JobError, JobReport};
use crate::models::NodeStatus;
use crate::search::{DeleteFilter, SearchIndex};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeCleaner {
    store: Arc<dyn NodeStore>,
    index: Arc<dyn SearchIndex>,
    deleted_ttl: i64,
    validation_failed_ttl: i64,
}

impl NodeCleaner {
    pub fn new(store: Arc<dyn NodeStore>, index: Arc<dyn SearchIndex>, ttl: &TtlConfig) -> Self {
        Self {
            store,
            index,
            deleted_ttl: ttl.deleted_secs,
            validation_failed_ttl: ttl.validation_failed_secs,
        }
    }

    /// Move posted nodes with `expires <= now` to `deleted` in both stores
    pub async fn expire(&self, now: i64) -> Result<JobReport, JobError> {
        const JOB: &str = "expire";
        let mut report = JobReport::new(JOB);

        let ids = self
            .store
            .update_status_by_expiration(NodeStatus::Posted, now)
            .await
            .map_err(JobError::wrap(JOB))?;

        report.processed = ids.len();

        // Predicate over the index, so documents a failed sweep left
        // `posted` are caught by the next one
        match self.index.update_status_by_expiration(now).await {
            Ok(updated) => {
                tracing::debug!("Marked {} expired documents deleted in the index", updated);
            }
            Err(e) => {
                tracing::error!("Failed to mirror expirations to the index: {}", e);
                report.failed = ids.len().max(1);
            }
        }
        Ok(report)
    }

    /// Hard-remove nodes deleted longer than the retention TTL
    pub async fn remove_deleted(&self, now: i64) -> Result<JobReport, JobError> {
        const JOB: &str = "remove_deleted";
        let mut report = JobReport::new(JOB);
        let cutoff = now - self.deleted_ttl;

        let ids = self
            .store
            .remove_by_last_updated(NodeStatus::Deleted, cutoff)
            .await
            .map_err(JobError::wrap(JOB))?;
        report.processed = ids.len();

        let filter = DeleteFilter {
            status: NodeStatus::Deleted,
            last_updated_before: cutoff,
        };
        match self.index.delete_many(&filter).await {
            Ok(removed) => {
                tracing::debug!("Removed {} deleted documents from the index", removed);
            }
            Err(e) => {
                // The predicate catches these on the next sweep
                tracing::error!("Failed to remove deleted documents from the index: {}", e);
                report.failed = ids.len();
            }
        }
        Ok(report)
    }

    /// Remove validation failures older than their TTL, measured from
    /// `created_at`
    pub async fn remove_validation_failed(&self, now: i64) -> Result<JobReport, JobError> {
        const JOB: &str = "remove_validation_failed";
        let mut report = JobReport::new(JOB);

        report.processed = self
            .store
            .remove_by_created_at(NodeStatus::ValidationFailed, now - self.validation_failed_ttl)
            .await
            .map_err(JobError::wrap(JOB))?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SurrealStore;
    use crate::models::Node;
    use crate::search::MemoryIndex;
    use serde_json::json;

    async fn stores() -> anyhow::Result<(Arc<SurrealStore>, Arc<MemoryIndex>)> {
        Ok((
            Arc::new(SurrealStore::connect_in_memory().await?),
            Arc::new(MemoryIndex::default()),
        ))
    }

    #[tokio::test]
    async fn test_remove_deleted_respects_ttl() -> anyhow::Result<()> {
        let (store, index) = stores().await?;
        let ttl = TtlConfig {
            deleted_secs: 100,
            validation_failed_secs: 100,
        };
        let cleaner = NodeCleaner::new(store.clone(), index.clone(), &ttl);

        let mut old = Node::new("https://a.test/old.json");
        old.set_status(NodeStatus::Deleted).set_last_updated(Some(1_000));
        store.add(&old).await?;
        index
            .index_by_id(&old.id, &json!({ "status": "deleted", "last_updated": 1_000 }))
            .await?;

        let mut recent = Node::new("https://a.test/recent.json");
        recent.set_status(NodeStatus::Deleted).set_last_updated(Some(1_950));
        store.add(&recent).await?;

        let report = cleaner.remove_deleted(2_000).await?;
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 0);
        assert!(store.get_by_id(&old.id).await.is_err());
        assert!(store.get_by_id(&recent.id).await.is_ok());
        assert!(index.get_document(&old.id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_expire_heals_documents_a_previous_sweep_missed() -> anyhow::Result<()> {
        let (store, index) = stores().await?;
        let cleaner = NodeCleaner::new(store.clone(), index.clone(), &TtlConfig::default());

        // Store already flipped by an earlier sweep whose index write was lost
        let mut node = Node::new("https://a.test/expired.json");
        node.set_status(NodeStatus::Deleted)
            .set_last_updated(Some(900))
            .set_expires(Some(800));
        store.add(&node).await?;
        index
            .index_by_id(
                &node.id,
                &json!({ "status": "posted", "last_updated": 500, "expires": 800 }),
            )
            .await?;

        let report = cleaner.expire(1_000).await?;
        assert_eq!(report.processed, 0);
        assert_eq!(report.failed, 0);
        let doc = index.get_document(&node.id).await?.expect("kept");
        assert_eq!(doc["status"], "deleted");
        assert_eq!(doc["last_updated"], 1_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_validation_failed_uses_created_at() -> anyhow::Result<()> {
        let (store, index) = stores().await?;
        let cleaner = NodeCleaner::new(store.clone(), index, &TtlConfig::default());

        let mut failed = Node::new("https://a.test/failed.json");
        failed.created_at = 0;
        failed.set_status(NodeStatus::ValidationFailed);
        store.add(&failed).await?;

        let report = cleaner.remove_validation_failed(chrono::Utc::now().timestamp()).await?;
        assert_eq!(report.processed, 1);
        Ok(())
    }
}
