//! Revalidation sweep
//!
//! Re-emits `node:created` for nodes stuck in `received` or `post_failed`,
//! e.g. after a listener crashed or the index was down. Each publish is
//! awaited before the next one, and the next page is only requested once
//! the current page is fully published.
//!
//! Nodes leaving the swept statuses while the sweep runs can shift later
//! pages; anything skipped is picked up by the next run.

use crate::db::NodeStore;
use crate::events::{publish_message, MessageBus, NodeCreated};
use crate::jobs::{JobError, JobReport};
use crate::models::NodeStatus;
use std::sync::Arc;

const STUCK: &[NodeStatus] = &[NodeStatus::Received, NodeStatus::PostFailed];

#[derive(Clone)]
pub struct Revalidator {
    store: Arc<dyn NodeStore>,
    bus: Arc<dyn MessageBus>,
    page_size: usize,
}

impl Revalidator {
    pub fn new(store: Arc<dyn NodeStore>, bus: Arc<dyn MessageBus>, page_size: usize) -> Self {
        Self {
            store,
            bus,
            page_size: page_size.max(1),
        }
    }

    pub async fn run(&self) -> Result<JobReport, JobError> {
        const JOB: &str = "revalidate";
        let mut report = JobReport::new(JOB);
        let mut start = 0;

        loop {
            let page = self
                .store
                .find_by_statuses(STUCK, start, self.page_size)
                .await
                .map_err(JobError::wrap(JOB))?;

            for node in &page {
                let event = NodeCreated {
                    profile_url: node.profile_url.clone(),
                    version: node.version.unwrap_or(0),
                };
                match publish_message(self.bus.as_ref(), &event).await {
                    Ok(()) => report.processed += 1,
                    Err(e) => {
                        tracing::error!("Failed to republish node {}: {}", node.id, e);
                        report.failed += 1;
                    }
                }
            }

            if page.len() < self.page_size {
                break;
            }
            start += page.len();
        }
        Ok(report)
    }
}
