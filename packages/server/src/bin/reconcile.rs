//! Single reconciliation run, for external cron schedulers
//!
//! Runs every job once, then waits for the republished nodes to go through
//! the in-process validation pipeline. Exits non-zero if any job failed.
//!
//! Needs a remote document store: an embedded rocksdb store is locked by the
//! index server, which runs the same jobs on its own schedule.

use murmur_server::{init_tracing, Runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = murmur_core::config::load()?;
    config.require_shared_store()?;
    let runtime = Runtime::connect(config).await?;
    let pipeline = runtime.start_pipeline().await?;

    let mut failures = 0;
    for outcome in runtime.reconciliation_jobs().run_all().await {
        match outcome {
            Ok(report) => tracing::info!("{}", report),
            Err(e) => {
                tracing::error!("{}", e);
                failures += 1;
            }
        }
    }

    let drain = runtime.config.bus.ack_wait() + runtime.config.http.timeout();
    if !runtime.bus.wait_idle(drain).await {
        tracing::warn!(
            "{} message(s) still in flight after {:?}",
            runtime.bus.in_flight(),
            drain
        );
    }
    for handle in pipeline {
        handle.abort();
    }

    if failures > 0 {
        anyhow::bail!("{} reconciliation job(s) failed", failures);
    }
    Ok(())
}
