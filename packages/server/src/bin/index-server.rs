//! Index server
//!
//! Serves the HTTP API and runs the validation pipeline and the periodic
//! reconciliation jobs in one process. Failing to reach either store at
//! startup is fatal.

use murmur_core::jobs::ReconciliationScheduler;
use murmur_server::{init_tracing, start_server, Runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = murmur_core::config::load()?;
    let runtime = Runtime::connect(config).await?;

    let pipeline = runtime.start_pipeline().await?;
    let scheduler = ReconciliationScheduler::start(
        runtime.reconciliation_jobs(),
        runtime.config.jobs.interval(),
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutdown requested");
    };
    let served = start_server(
        runtime.app_state(),
        &runtime.config.server.listen_addr,
        shutdown,
    )
    .await;

    scheduler.shutdown().await;
    if !runtime.bus.wait_idle(runtime.config.bus.ack_wait()).await {
        tracing::warn!("{} message(s) still in flight at exit", runtime.bus.in_flight());
    }
    for handle in pipeline {
        handle.abort();
    }
    served
}
