//! Periodic reconciliation
//!
//! ## Model
//!
//! `ReconciliationScheduler` owns one background task that runs every job
//! on a fixed interval, starting immediately. The task stops when
//! `shutdown()` is called or the scheduler is dropped; a run in progress is
//! finished first.

use crate::config::MurmurConfig;
use crate::db::NodeStore;
use crate::events::MessageBus;
use crate::jobs::{JobError, JobReport, NodeCleaner, Revalidator};
use crate::search::SearchIndex;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Every reconciliation job, run in a fixed order
#[derive(Clone)]
pub struct ReconciliationJobs {
    cleaner: NodeCleaner,
    revalidator: Revalidator,
}

impl ReconciliationJobs {
    pub fn new(
        store: Arc<dyn NodeStore>,
        index: Arc<dyn SearchIndex>,
        bus: Arc<dyn MessageBus>,
        config: &MurmurConfig,
    ) -> Self {
        Self {
            cleaner: NodeCleaner::new(store.clone(), index, &config.ttl),
            revalidator: Revalidator::new(store, bus, config.jobs.revalidate_page_size),
        }
    }

    /// Run all jobs once; a failing job does not stop the others
    pub async fn run_all(&self) -> Vec<Result<JobReport, JobError>> {
        let now = Utc::now().timestamp();
        vec![
            self.cleaner.expire(now).await,
            self.cleaner.remove_deleted(now).await,
            self.cleaner.remove_validation_failed(now).await,
            self.revalidator.run().await,
        ]
    }
}

/// Background runner for [`ReconciliationJobs`]
pub struct ReconciliationScheduler {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReconciliationScheduler {
    pub fn start(jobs: ReconciliationJobs, interval: Duration) -> Self {
        tracing::info!("ReconciliationScheduler starting, interval {:?}", interval);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased; // Check shutdown first

                    _ = shutdown_rx.recv() => {
                        tracing::info!("ReconciliationScheduler shutting down");
                        break;
                    }

                    _ = ticker.tick() => {
                        for outcome in jobs.run_all().await {
                            match outcome {
                                Ok(report) if report.failed > 0 => tracing::warn!("{}", report),
                                Ok(report) => tracing::info!("{}", report),
                                Err(e) => tracing::error!("{}", e),
                            }
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the background task and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::error!("ReconciliationScheduler task failed: {}", e);
        }
    }
}
