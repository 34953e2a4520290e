//! Node Service - Lifecycle Orchestration
//!
//! This module owns the consistency rules between the document store and the
//! search index:
//!
//! - API operations: add, get, delete, search, map points, export, dry-run
//!   validation
//! - Bus outcomes: `node:validated` and `node:validation_failed`
//!
//! # Consistency Rules
//!
//! The document store is authoritative. The search index is a projection
//! keyed by the same id and written with idempotent upserts, so replaying a
//! transition is always safe.
//!
//! Forward transitions (validation outcomes) are compare-and-swap writes on
//! the `version` carried by the event. A stale or duplicate event finds a
//! newer version in the store and becomes a no-op. Deletion writes
//! unconditionally and bumps the version, which also invalidates any
//! validation outcome still in flight.
//!
//! A validated outcome is indexed before its store write. If a delete lands
//! in between, the store write is dropped and the index document is
//! re-mirrored as deleted.

use crate::config::MurmurConfig;
use crate::db::{DatabaseError, NodeStore};
use crate::events::{publish_message, MessageBus, NodeCreated, NodeValidated, NodeValidationFailed};
use crate::models::{Node, NodeStatus, ValidationError};
use crate::search::{ExportQuery, ExportResults, MapResults, SearchIndex, SearchQuery, SearchResults};
use crate::services::enrichment::{expires_of, Enricher};
use crate::services::error::{DeleteNodeError, NodeServiceError};
use crate::services::library::{schemas_for, CountryLookup, SchemaValidator};
use crate::services::profile_fetcher::{FetchError, ProfileFetcher};
use crate::services::profile_url::validate_profile_url;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

/// Collaborators of a [`NodeService`]
#[derive(Clone)]
pub struct NodeServiceDeps {
    pub store: Arc<dyn NodeStore>,
    pub index: Arc<dyn SearchIndex>,
    pub bus: Arc<dyn MessageBus>,
    pub fetcher: Arc<dyn ProfileFetcher>,
    pub countries: Arc<dyn CountryLookup>,
    pub validator: Arc<dyn SchemaValidator>,
}

/// Lifecycle orchestration over the document store and the search index
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct NodeService {
    store: Arc<dyn NodeStore>,
    index: Arc<dyn SearchIndex>,
    bus: Arc<dyn MessageBus>,
    fetcher: Arc<dyn ProfileFetcher>,
    validator: Arc<dyn SchemaValidator>,
    enricher: Enricher,
    gateway_alias: String,
}

impl NodeService {
    pub fn new(deps: NodeServiceDeps, config: &MurmurConfig) -> Self {
        Self {
            enricher: Enricher::new(deps.countries, &config.enrichment),
            store: deps.store,
            index: deps.index,
            bus: deps.bus,
            fetcher: deps.fetcher,
            validator: deps.validator,
            gateway_alias: config.validation.internal_gateway_alias.clone(),
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Register a profile URL and request its validation
    ///
    /// Returns the node id immediately; validation is asynchronous. The id
    /// is derived from the URL, so resubmitting a URL targets the same
    /// record.
    ///
    /// # Short-circuits
    ///
    /// Nothing is written and no event is published when the node is
    /// `deleted` and its profile is gone, or when it is `posted` and the
    /// profile content is unchanged.
    pub async fn add(&self, profile_url: &str) -> Result<String, NodeServiceError> {
        let profile_url = profile_url.trim();
        validate_profile_url(profile_url, &self.gateway_alias)?;

        let id = crate::models::node_id(profile_url);
        let existing = match self.store.get_by_id(&id).await {
            Ok(node) => Some(node),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(existing) = &existing {
            if self.unchanged_or_gone(existing).await {
                return Ok(id);
            }
        }

        let mut node = existing.unwrap_or_else(|| Node::new(profile_url));
        node.set_status(NodeStatus::Received)
            .set_last_updated(None)
            .set_failure_reasons(Vec::new());

        let version = self.store.add(&node).await?;
        node.set_version(Some(version));
        tracing::info!("Node {} received for {} at version {}", id, profile_url, version);

        publish_message(
            self.bus.as_ref(),
            &NodeCreated {
                profile_url: profile_url.to_string(),
                version,
            },
        )
        .await?;

        Ok(id)
    }

    /// True when a resubmission of `existing` needs no write
    async fn unchanged_or_gone(&self, existing: &Node) -> bool {
        let fetched = match self.fetcher.fetch(&existing.profile_url).await {
            Ok(resp) => resp.json_profile().cloned(),
            Err(e) => {
                tracing::debug!("Pre-add fetch of {} failed: {}", existing.profile_url, e);
                None
            }
        };

        match (existing.status, fetched) {
            (NodeStatus::Deleted, None) => {
                tracing::info!(
                    "Ignoring resubmission of deleted node {}: profile is gone",
                    existing.id
                );
                true
            }
            (NodeStatus::Posted, Some(profile)) => {
                let unchanged = existing.profile_hash.as_deref()
                    == Some(crate::models::profile_hash(&profile).as_str());
                if unchanged {
                    tracing::info!("Profile of node {} is unchanged, nothing to do", existing.id);
                }
                unchanged
            }
            _ => false,
        }
    }

    /// Read the authoritative record
    pub async fn get(&self, id: &str) -> Result<Node, NodeServiceError> {
        Ok(self.store.get_by_id(id).await?)
    }

    /// Apply a `node:validated` outcome
    ///
    /// The store write is conditioned on `event.version`. Stale, duplicate
    /// and post-delete events are acknowledged without effect.
    pub async fn on_validated(&self, event: &NodeValidated) -> Result<(), NodeServiceError> {
        let Some(mut node) = self.current_for(&event.profile_url, event.version).await? else {
            return Ok(());
        };
        let id = node.id.clone();

        let profile: Value = serde_json::from_str(&event.profile_str).map_err(|e| {
            NodeServiceError::invalid_event(format!("profile_str of {} is not JSON: {}", id, e))
        })?;
        let document = self
            .enricher
            .enrich(&profile, &event.profile_url, event.last_updated)
            .await;

        node.set_profile_hash(Some(event.profile_hash.clone()))
            .set_failure_reasons(Vec::new())
            .set_expires(expires_of(&profile));

        match self.index.index_by_id(&id, &document).await {
            Ok(()) => {
                node.set_status(NodeStatus::Posted)
                    .set_last_updated(Some(event.last_updated));
            }
            Err(e) => {
                tracing::error!("Failed to index node {}: {}", id, e);
                node.set_status(NodeStatus::PostFailed);
                if let Err(e) = self
                    .index
                    .update(&id, &json!({ "status": NodeStatus::PostFailed.as_str() }))
                    .await
                {
                    tracing::warn!("Could not mark index document {} as post_failed: {}", id, e);
                }
            }
        }

        match self.store.update(&node).await? {
            Some(version) => {
                tracing::info!("Node {} is {} at version {}", id, node.status, version);
            }
            None => {
                tracing::info!(
                    "Node {} moved past version {} while it was being posted",
                    id,
                    event.version
                );
                self.remirror_deleted(&id).await?;
            }
        }
        Ok(())
    }

    /// Apply a `node:validation_failed` outcome
    pub async fn on_validation_failed(&self, event: &NodeValidationFailed) -> Result<(), NodeServiceError> {
        let Some(mut node) = self.current_for(&event.profile_url, event.version).await? else {
            return Ok(());
        };
        let id = node.id.clone();

        // A previously posted profile leaves the index. Removed before the
        // store write so a failed delete is retried on redelivery.
        self.index.delete_by_id(&id).await?;

        node.set_status(NodeStatus::ValidationFailed)
            .set_failure_reasons(event.failure_reasons.clone())
            .set_last_updated(None);

        match self.store.update(&node).await? {
            Some(version) => {
                tracing::info!(
                    "Node {} failed validation with {} reason(s) at version {}",
                    id,
                    event.failure_reasons.len(),
                    version
                );
            }
            None => {
                tracing::info!("Dropped stale validation failure for node {}", id);
            }
        }
        Ok(())
    }

    /// The record an outcome at `version` applies to, if it still does
    async fn current_for(&self, profile_url: &str, version: i64) -> Result<Option<Node>, NodeServiceError> {
        let id = crate::models::node_id(profile_url);
        let node = match self.store.get_by_id(&id).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Outcome for unknown node {} ({})", id, profile_url);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if node.status == NodeStatus::Deleted {
            tracing::debug!("Node {} is deleted, ignoring outcome", id);
            return Ok(None);
        }
        if node.version != Some(version) {
            tracing::debug!(
                "Outcome for node {} carries version {} but store has {:?}",
                id,
                version,
                node.version
            );
            return Ok(None);
        }
        Ok(Some(node))
    }

    /// Restore the deleted status in the index after a lost race
    async fn remirror_deleted(&self, id: &str) -> Result<(), NodeServiceError> {
        let current = match self.store.get_by_id(id).await {
            Ok(node) => node,
            Err(e) if e.is_not_found() => {
                self.index.delete_by_id(id).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if current.status == NodeStatus::Deleted {
            tracing::info!("Re-mirroring deletion of node {} into the index", id);
            self.index
                .update(id, &deleted_patch(current.last_updated))
                .await?;
        }
        Ok(())
    }

    /// Soft-delete a node whose profile is no longer served
    ///
    /// Returns the node's profile URL.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown id
    /// - `DeleteNode` when the profile still exists or cannot be checked
    pub async fn delete(&self, id: &str) -> Result<String, NodeServiceError> {
        let node = self.store.get_by_id(id).await?;
        let url = node.profile_url.as_str();

        match self.fetcher.fetch(url).await {
            Err(FetchError::Unreachable(reason)) => {
                tracing::info!("Refusing delete of {}: {} unreachable ({})", id, url, reason);
                return Err(DeleteNodeError::url_not_found(id, url).into());
            }
            Err(FetchError::Failed(reason)) => {
                tracing::info!("Refusing delete of {}: {} failed ({})", id, url, reason);
                return Err(DeleteNodeError::cannot_be_checked(id, url).into());
            }
            Ok(resp) if resp.status == 404 || resp.is_redirect() || resp.body.is_none() => {}
            Ok(resp) if resp.status == 200 => {
                return Err(DeleteNodeError::still_exists(
                    id,
                    url,
                    format!(
                        "The profile could not be deleted from the Index because it still exists at the profile_url: {}",
                        url
                    ),
                )
                .into());
            }
            Ok(resp) => {
                return Err(DeleteNodeError::still_exists(
                    id,
                    url,
                    format!(
                        "The node at {} returned the following status code: {}",
                        url, resp.status
                    ),
                )
                .into());
            }
        }

        let version = self
            .store
            .soft_delete(id)
            .await?
            .ok_or_else(|| NodeServiceError::not_found(id))?;

        let last_updated = match self.store.get_by_id(id).await {
            Ok(deleted) => deleted.last_updated,
            Err(DatabaseError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        self.index.update(id, &deleted_patch(last_updated)).await?;

        tracing::info!("Node {} deleted at version {}", id, version);
        Ok(node.profile_url)
    }

    /// Paginated search; rejects pages beyond the result window before
    /// querying
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, NodeServiceError> {
        query.check_window()?;
        Ok(self.index.search(query).await?)
    }

    /// Map markers for the search filters
    pub async fn get_nodes(&self, query: &SearchQuery) -> Result<MapResults, NodeServiceError> {
        query.check_window()?;
        Ok(self.index.get_nodes(query).await?)
    }

    /// One cursor page of the full corpus
    pub async fn export(&self, query: &ExportQuery) -> Result<ExportResults, NodeServiceError> {
        Ok(self.index.export(query).await?)
    }

    /// Validate a profile without persisting anything
    pub async fn validate_profile(&self, profile: &Value) -> Result<(), NodeServiceError> {
        if !profile.is_object() {
            return Err(ValidationError::MalformedJson("profile is not a JSON object".to_string()).into());
        }

        let schemas = schemas_for(profile).ok_or_else(|| {
            ValidationError::missing_field("linked_schemas", "The `linked_schemas` property is required.")
        })?;

        if profile.get("expires").is_some() {
            match expires_of(profile) {
                Some(expires) if expires > Utc::now().timestamp() => {}
                _ => {
                    let expires = expires_of(profile).unwrap_or_default();
                    return Err(ValidationError::InvalidExpires { expires }.into());
                }
            }
        }

        let reasons = self.validator.validate(profile, &schemas).await;
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ProfileRejected(reasons).into())
        }
    }
}

fn deleted_patch(last_updated: Option<i64>) -> Value {
    let last_updated = last_updated.unwrap_or_else(|| Utc::now().timestamp());
    json!({ "status": NodeStatus::Deleted.as_str(), "last_updated": last_updated })
}
