//! Event Listeners
//!
//! Consume validation outcomes and drive node transitions through
//! [`NodeService`]. Each delivery is processed on its own task, so outcomes
//! for different nodes proceed in parallel. A delivery is acknowledged only
//! after its handler returns `Ok`; errors and panics are logged and leave it
//! unacknowledged for redelivery.

use crate::events::bus::{decode_message, Delivery, MessageBus, Subscription};
use crate::events::messages::{BusMessage, NodeValidated, NodeValidationFailed};
use crate::services::NodeService;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Queue group shared by every index service instance
pub const INDEX_QUEUE_GROUP: &str = "index-qgroup";

/// Processes one message payload
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()>;
}

/// Run `handler` for every delivery of `subscription`, one task per message
pub fn spawn_listener(mut subscription: Subscription, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            "Listening on {} as {}",
            subscription.subject(),
            subscription.group()
        );
        while let Some(delivery) = subscription.next().await {
            let handler = handler.clone();
            tokio::spawn(process_delivery(handler, delivery));
        }
        tracing::info!("Subscription to {} closed", subscription.subject());
    })
}

async fn process_delivery(handler: Arc<dyn MessageHandler>, delivery: Delivery) {
    let outcome = AssertUnwindSafe(handler.handle(delivery.payload()))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(())) => delivery.ack(),
        Ok(Err(e)) => {
            tracing::error!(
                "Handler for {} failed on attempt {}: {:#}",
                delivery.subject(),
                delivery.attempt(),
                e
            );
        }
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(
                "Panic while handling {} (attempt {}): {}",
                delivery.subject(),
                delivery.attempt(),
                reason
            );
        }
    }
}

/// Applies `node:validated` through the node service
pub struct NodeValidatedHandler {
    service: Arc<NodeService>,
}

impl NodeValidatedHandler {
    pub fn new(service: Arc<NodeService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for NodeValidatedHandler {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: NodeValidated = decode_message(payload)?;
        tracing::debug!(
            "Received {} for {} at version {}",
            NodeValidated::SUBJECT,
            event.profile_url,
            event.version
        );
        self.service.on_validated(&event).await?;
        Ok(())
    }
}

/// Applies `node:validation_failed` through the node service
pub struct NodeValidationFailedHandler {
    service: Arc<NodeService>,
}

impl NodeValidationFailedHandler {
    pub fn new(service: Arc<NodeService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl MessageHandler for NodeValidationFailedHandler {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: NodeValidationFailed = decode_message(payload)?;
        tracing::debug!(
            "Received {} for {} at version {}",
            NodeValidationFailed::SUBJECT,
            event.profile_url,
            event.version
        );
        self.service.on_validation_failed(&event).await?;
        Ok(())
    }
}

/// Subscribe both outcome listeners in the index queue group
pub async fn start_index_listeners(
    bus: &dyn MessageBus,
    service: Arc<NodeService>,
) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let validated = bus
        .queue_subscribe(NodeValidated::SUBJECT, INDEX_QUEUE_GROUP)
        .await?;
    let failed = bus
        .queue_subscribe(NodeValidationFailed::SUBJECT, INDEX_QUEUE_GROUP)
        .await?;

    Ok(vec![
        spawn_listener(validated, Arc::new(NodeValidatedHandler::new(service.clone()))),
        spawn_listener(failed, Arc::new(NodeValidationFailedHandler::new(service))),
    ])
}
