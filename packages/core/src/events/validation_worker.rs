//! Validation worker
//!
//! Consumes `node:created`, fetches the profile and validates it against the
//! default schema plus its `linked_schemas`. The outcome is published as
//! `node:validated` or `node:validation_failed`, stamped with the version the
//! request carried.

use crate::events::bus::{decode_message, publish_message, MessageBus};
use crate::events::listeners::{spawn_listener, MessageHandler};
use crate::events::messages::{BusMessage, NodeCreated, NodeValidated, NodeValidationFailed};
use crate::models::{compact_json, profile_hash, ErrorObject};
use crate::services::library::{schemas_for, SchemaValidator};
use crate::services::profile_fetcher::ProfileFetcher;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Queue group shared by every validation worker
pub const VALIDATION_QUEUE_GROUP: &str = "validation-qgroup";

pub struct ValidationWorker {
    bus: Arc<dyn MessageBus>,
    fetcher: Arc<dyn ProfileFetcher>,
    validator: Arc<dyn SchemaValidator>,
}

impl ValidationWorker {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        fetcher: Arc<dyn ProfileFetcher>,
        validator: Arc<dyn SchemaValidator>,
    ) -> Self {
        Self {
            bus,
            fetcher,
            validator,
        }
    }

    /// Validate one created node and publish the outcome
    pub async fn validate(&self, event: &NodeCreated) -> anyhow::Result<()> {
        let url = &event.profile_url;

        let profile = match self.fetcher.fetch(url).await {
            Ok(resp) => resp.json_profile().cloned(),
            Err(e) => {
                tracing::warn!("Could not fetch profile {}: {}", url, e);
                None
            }
        };

        let Some(profile) = profile else {
            let reason = ErrorObject::new(
                404,
                "Profile Not Found",
                format!(
                    "Could not find or read from (invalid JSON) the profile_url: {}",
                    url
                ),
            );
            return self.reject(event, vec![reason]).await;
        };

        let Some(schemas) = schemas_for(&profile) else {
            let reason = ErrorObject::bad_request(
                "Missing Required Property",
                "The `linked_schemas` property is required.",
            )
            .with_pointer("/linked_schemas");
            return self.reject(event, vec![reason]).await;
        };

        let reasons = self.validator.validate(&profile, &schemas).await;
        if !reasons.is_empty() {
            return self.reject(event, reasons).await;
        }

        publish_message(
            self.bus.as_ref(),
            &NodeValidated {
                profile_url: url.clone(),
                profile_hash: profile_hash(&profile),
                profile_str: compact_json(&profile),
                last_updated: Utc::now().timestamp(),
                version: event.version,
            },
        )
        .await?;
        tracing::info!("Profile {} is valid (version {})", url, event.version);
        Ok(())
    }

    async fn reject(&self, event: &NodeCreated, failure_reasons: Vec<ErrorObject>) -> anyhow::Result<()> {
        tracing::info!(
            "Profile {} failed validation with {} reason(s)",
            event.profile_url,
            failure_reasons.len()
        );
        publish_message(
            self.bus.as_ref(),
            &NodeValidationFailed {
                profile_url: event.profile_url.clone(),
                failure_reasons,
                version: event.version,
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for ValidationWorker {
    async fn handle(&self, payload: &[u8]) -> anyhow::Result<()> {
        let event: NodeCreated = decode_message(payload)?;
        tracing::debug!(
            "Received {} for {} at version {}",
            NodeCreated::SUBJECT,
            event.profile_url,
            event.version
        );
        self.validate(&event).await
    }
}

/// Subscribe a validation worker in the validation queue group
pub async fn start_validation_worker(
    bus: Arc<dyn MessageBus>,
    fetcher: Arc<dyn ProfileFetcher>,
    validator: Arc<dyn SchemaValidator>,
) -> anyhow::Result<JoinHandle<()>> {
    let subscription = bus
        .queue_subscribe(NodeCreated::SUBJECT, VALIDATION_QUEUE_GROUP)
        .await?;
    let worker = ValidationWorker::new(bus, fetcher, validator);
    Ok(spawn_listener(subscription, Arc::new(worker)))
}
