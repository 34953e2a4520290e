//! Reconciliation Jobs
//!
//! Periodic sweeps that bound the drift between the document store and the
//! search index:
//!
//! - `expire`: posted nodes past `expires` become `deleted` in both stores
//! - `remove_deleted`: deleted nodes past the retention TTL are removed
//! - `remove_validation_failed`: failed nodes older than their TTL are removed
//! - `revalidate`: stuck `received`/`post_failed` nodes get a new
//!   `node:created`
//!
//! Jobs log and count per-item failures instead of aborting the sweep.

mod node_cleaner;
mod revalidate;
mod scheduler;

pub use node_cleaner::NodeCleaner;
pub use revalidate::Revalidator;
pub use scheduler::{ReconciliationJobs, ReconciliationScheduler};

use crate::db::DatabaseError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Outcome of one job run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job: &'static str,
    pub processed: usize,
    pub failed: usize,
}

impl JobReport {
    pub fn new(job: &'static str) -> Self {
        Self {
            job,
            processed: 0,
            failed: 0,
        }
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} failed",
            self.job, self.processed, self.failed
        )
    }
}

/// A job that could not run at all
#[derive(Debug, Error)]
#[error("Job {job} failed: {source}")]
pub struct JobError {
    pub job: &'static str,
    #[source]
    pub source: DatabaseError,
}

impl JobError {
    pub fn wrap(job: &'static str) -> impl FnOnce(DatabaseError) -> Self {
        move |source| Self { job, source }
    }
}
