//! Bounded exponential backoff for connecting to the stores.
//!
//! Startup retries a failing connection with growing, jittered delays until
//! the policy's total delay budget is spent, then gives up with the last
//! error. Callers treat that error as fatal.

use backon::{ExponentialBuilder, Retryable};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Exponential backoff parameters
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f32,
    pub max_interval: Duration,
    /// Total time spent sleeping between attempts before giving up
    pub max_elapsed: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(120),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    pub fn builder(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.initial_interval)
            .with_factor(self.multiplier)
            .with_max_delay(self.max_interval)
            .with_total_delay(Some(self.max_elapsed))
            .without_max_times();
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `op` until it succeeds or the delay budget runs out
///
/// `what` names the operation in the retry log lines.
pub async fn retry_with_backoff<T, E, F, Fut>(policy: &BackoffPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    op.retry(policy.builder())
        .sleep(tokio::time::sleep)
        .notify(|err: &E, delay: Duration| {
            tracing::info!(
                "{} failed: {}, retry in {:.1} seconds",
                what,
                err,
                delay.as_secs_f64()
            );
        })
        .await
        .map_err(|err| {
            tracing::error!("{} failed, giving up: {}", what, err);
            err
        })
}
