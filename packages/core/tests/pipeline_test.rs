//! End-to-end node lifecycle over the in-process bus
//!
//! Each test wires the node service, the validation worker and the index
//! listeners on one `InMemoryBus`, submits profiles and waits for the bus to
//! settle before checking both stores.

use async_trait::async_trait;
use murmur_core::config::{BusConfig, TtlConfig};
use murmur_core::db::{DatabaseError, NodeStore, SurrealStore};
use murmur_core::events::{start_index_listeners, start_validation_worker, InMemoryBus};
use murmur_core::jobs::{NodeCleaner, Revalidator};
use murmur_core::models::{profile_hash, ErrorObject, NodeStatus};
use murmur_core::search::{
    DeleteFilter, ExportQuery, ExportResults, MapResults, MemoryIndex, SearchIndex, SearchQuery,
    SearchResults,
};
use murmur_core::services::{
    CountryLookup, FetchError, ProfileFetcher, ProfileResponse, SchemaValidator,
};
use murmur_core::{MurmurConfig, NodeService, NodeServiceDeps};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct ProfileHost {
    profiles: Mutex<HashMap<String, Value>>,
}

impl ProfileHost {
    fn publish(&self, url: &str, profile: Value) {
        self.profiles.lock().unwrap().insert(url.to_string(), profile);
    }

    fn take_down(&self, url: &str) {
        self.profiles.lock().unwrap().remove(url);
    }
}

#[async_trait]
impl ProfileFetcher for ProfileHost {
    async fn fetch(&self, url: &str) -> Result<ProfileResponse, FetchError> {
        Ok(match self.profiles.lock().unwrap().get(url) {
            Some(profile) => ProfileResponse {
                status: 200,
                body: Some(profile.clone()),
            },
            None => ProfileResponse {
                status: 404,
                body: None,
            },
        })
    }
}

struct Countries;

#[async_trait]
impl CountryLookup for Countries {
    async fn find_alpha2(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok((name.eq_ignore_ascii_case("germany")).then(|| "DE".to_string()))
    }
}

struct RequireName;

#[async_trait]
impl SchemaValidator for RequireName {
    async fn validate(&self, profile: &Value, _schemas: &[String]) -> Vec<ErrorObject> {
        if profile.get("name").is_some() {
            Vec::new()
        } else {
            vec![ErrorObject::bad_request(
                "Missing Required Property",
                "The `name` property is required - Schema: default-v2.1.0",
            )]
        }
    }
}

/// `MemoryIndex` whose writes can be told to fail a number of times
#[derive(Default)]
struct FlakyIndex {
    inner: MemoryIndex,
    failing_index_writes: AtomicU32,
    failing_deletes: AtomicU32,
    failing_expirations: AtomicU32,
}

impl FlakyIndex {
    fn fail_next(counter: &AtomicU32, times: u32) {
        counter.store(times, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicU32, what: &str) -> Result<(), DatabaseError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(DatabaseError::index_request(format!("{} refused", what)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SearchIndex for FlakyIndex {
    async fn index_by_id(&self, id: &str, document: &Value) -> Result<(), DatabaseError> {
        Self::trip(&self.failing_index_writes, "index")?;
        self.inner.index_by_id(id, document).await
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, DatabaseError> {
        self.inner.search(query).await
    }

    async fn get_nodes(&self, query: &SearchQuery) -> Result<MapResults, DatabaseError> {
        self.inner.get_nodes(query).await
    }

    async fn export(&self, query: &ExportQuery) -> Result<ExportResults, DatabaseError> {
        self.inner.export(query).await
    }

    async fn update(&self, id: &str, partial: &Value) -> Result<(), DatabaseError> {
        self.inner.update(id, partial).await
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), DatabaseError> {
        Self::trip(&self.failing_deletes, "delete")?;
        self.inner.delete_by_id(id).await
    }

    async fn delete_many(&self, filter: &DeleteFilter) -> Result<u64, DatabaseError> {
        self.inner.delete_many(filter).await
    }

    async fn update_status_by_expiration(&self, now: i64) -> Result<u64, DatabaseError> {
        Self::trip(&self.failing_expirations, "update by query")?;
        self.inner.update_status_by_expiration(now).await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Value>, DatabaseError> {
        self.inner.get_document(id).await
    }
}

struct Pipeline {
    service: Arc<NodeService>,
    store: Arc<SurrealStore>,
    index: Arc<FlakyIndex>,
    bus: Arc<InMemoryBus>,
    host: Arc<ProfileHost>,
}

impl Pipeline {
    async fn new() -> anyhow::Result<Self> {
        let store = Arc::new(SurrealStore::connect_in_memory().await?);
        let index = Arc::new(FlakyIndex::default());
        let bus = Arc::new(InMemoryBus::new(&BusConfig {
            ack_wait_ms: 100,
            max_deliver: 3,
        }));
        let host = Arc::new(ProfileHost::default());
        let service = Arc::new(NodeService::new(
            NodeServiceDeps {
                store: store.clone(),
                index: index.clone(),
                bus: bus.clone(),
                fetcher: host.clone(),
                countries: Arc::new(Countries),
                validator: Arc::new(RequireName),
            },
            &MurmurConfig::default(),
        ));
        Ok(Self {
            service,
            store,
            index,
            bus,
            host,
        })
    }

    async fn start(&self) -> anyhow::Result<()> {
        start_index_listeners(self.bus.as_ref(), self.service.clone()).await?;
        start_validation_worker(self.bus.clone(), self.host.clone(), Arc::new(RequireName)).await?;
        Ok(())
    }

    async fn settle(&self) {
        assert!(
            self.bus.wait_idle(Duration::from_secs(5)).await,
            "bus did not settle"
        );
    }
}

const URL: &str = "https://bakery.example.org/profile.json";

fn bakery() -> Value {
    json!({
        "name": "Community Bakery",
        "linked_schemas": ["organizations-v1.0.0"],
        "primary_url": "https://bakery.example.org/",
        "country_name": "Germany",
        "geolocation": "52.52,13.40",
        "tags": ["bread", "cooperative"],
        "description": "not indexed",
    })
}

#[tokio::test]
async fn test_valid_profile_is_posted_and_indexed() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, bakery());

    let id = p.service.add(URL).await?;
    p.settle().await;

    let node = p.service.get(&id).await?;
    assert_eq!(node.status, NodeStatus::Posted);
    assert_eq!(node.profile_hash, Some(profile_hash(&bakery())));
    assert!(node.last_updated.is_some());
    assert!(node.failure_reasons.is_empty());

    let doc = p.index.get_document(&id).await?.expect("indexed");
    assert_eq!(doc["status"], "posted");
    assert_eq!(doc["profile_url"], URL);
    assert_eq!(doc["country"], "DE");
    assert_eq!(doc["geolocation"], json!({ "lat": 52.52, "lon": 13.4 }));
    assert_eq!(doc["primary_url"], "bakery.example.org");
    assert!(doc.get("description").is_none());
    assert_eq!(doc["last_updated"], json!(node.last_updated));
    Ok(())
}

#[tokio::test]
async fn test_rejected_profile_is_never_indexed() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, json!({ "linked_schemas": ["organizations-v1.0.0"] }));

    let id = p.service.add(URL).await?;
    p.settle().await;

    let node = p.service.get(&id).await?;
    assert_eq!(node.status, NodeStatus::ValidationFailed);
    assert_eq!(node.failure_reasons[0].title, "Missing Required Property");
    assert!(node.last_updated.is_none());
    assert!(p.index.get_document(&id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_profile_fails_with_404_reason() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;

    let id = p.service.add(URL).await?;
    p.settle().await;

    let node = p.service.get(&id).await?;
    assert_eq!(node.status, NodeStatus::ValidationFailed);
    assert_eq!(node.failure_reasons[0].status, 404);
    assert_eq!(node.failure_reasons[0].title, "Profile Not Found");
    Ok(())
}

#[tokio::test]
async fn test_versions_only_increase_across_resubmissions() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, bakery());

    let id = p.service.add(URL).await?;
    p.settle().await;
    let first = p.service.get(&id).await?;

    // Same content: nothing changes
    p.service.add(URL).await?;
    p.settle().await;
    let unchanged = p.service.get(&id).await?;
    assert_eq!(unchanged.version, first.version);

    let mut changed = bakery();
    changed["name"] = json!("Community Bakery and Cafe");
    p.host.publish(URL, changed.clone());
    p.service.add(URL).await?;
    p.settle().await;

    let second = p.service.get(&id).await?;
    assert_eq!(second.status, NodeStatus::Posted);
    assert_eq!(second.profile_hash, Some(profile_hash(&changed)));
    assert!(second.version > first.version);
    assert_eq!(
        p.index.get_document(&id).await?.expect("indexed")["name"],
        "Community Bakery and Cafe"
    );
    Ok(())
}

#[tokio::test]
async fn test_delete_wins_over_in_flight_validation() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;

    // Submitted while the pipeline is down, deleted before it comes up
    let id = p.service.add(URL).await?;
    p.service.delete(&id).await?;

    p.host.publish(URL, bakery());
    p.start().await?;
    p.settle().await;

    let node = p.service.get(&id).await?;
    assert_eq!(node.status, NodeStatus::Deleted);
    assert!(p.index.get_document(&id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_deleted_profile_can_be_resubmitted() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, bakery());
    let id = p.service.add(URL).await?;
    p.settle().await;

    p.host.take_down(URL);
    p.service.delete(&id).await?;
    assert_eq!(p.index.get_document(&id).await?.expect("kept")["status"], "deleted");

    // Still gone: resubmitting is a no-op
    p.service.add(URL).await?;
    p.settle().await;
    assert_eq!(p.service.get(&id).await?.status, NodeStatus::Deleted);

    p.host.publish(URL, bakery());
    p.service.add(URL).await?;
    p.settle().await;
    assert_eq!(p.service.get(&id).await?.status, NodeStatus::Posted);
    assert_eq!(p.index.get_document(&id).await?.expect("indexed")["status"], "posted");
    Ok(())
}

#[tokio::test]
async fn test_expired_profile_is_marked_deleted() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    let now = chrono::Utc::now().timestamp();
    let mut profile = bakery();
    profile["expires"] = json!(now + 3_600);
    p.host.publish(URL, profile);

    let id = p.service.add(URL).await?;
    p.settle().await;
    let posted = p.store.get_by_id(&id).await?;
    assert_eq!(posted.expires, Some(now + 3_600));

    let cleaner = NodeCleaner::new(p.store.clone(), p.index.clone(), &TtlConfig::default());
    let report = cleaner.expire(now + 7_200).await?;
    assert_eq!(report.processed, 1);

    let expired = p.store.get_by_id(&id).await?;
    assert_eq!(expired.status, NodeStatus::Deleted);
    assert!(expired.version > posted.version);
    assert_eq!(p.index.get_document(&id).await?.expect("kept")["status"], "deleted");
    Ok(())
}

#[tokio::test]
async fn test_failed_index_write_is_retried_by_revalidation() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, bakery());
    FlakyIndex::fail_next(&p.index.failing_index_writes, 1);

    let id = p.service.add(URL).await?;
    p.settle().await;
    let failed = p.service.get(&id).await?;
    assert_eq!(failed.status, NodeStatus::PostFailed);
    assert_eq!(failed.profile_hash, Some(profile_hash(&bakery())));
    assert!(p.index.get_document(&id).await?.is_none());

    let report = Revalidator::new(p.store.clone(), p.bus.clone(), 10).run().await?;
    assert_eq!(report.processed, 1);
    p.settle().await;

    assert_eq!(p.service.get(&id).await?.status, NodeStatus::Posted);
    assert_eq!(p.index.get_document(&id).await?.expect("indexed")["status"], "posted");
    Ok(())
}

#[tokio::test]
async fn test_expiration_reaches_index_after_failed_mirror() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    let now = chrono::Utc::now().timestamp();
    let mut profile = bakery();
    profile["expires"] = json!(now + 3_600);
    p.host.publish(URL, profile);
    let id = p.service.add(URL).await?;
    p.settle().await;

    let cleaner = NodeCleaner::new(p.store.clone(), p.index.clone(), &TtlConfig::default());
    FlakyIndex::fail_next(&p.index.failing_expirations, 1);
    let report = cleaner.expire(now + 7_200).await?;
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(p.store.get_by_id(&id).await?.status, NodeStatus::Deleted);
    assert_eq!(p.index.get_document(&id).await?.expect("kept")["status"], "posted");

    // Nothing left to flip in the store, the index still catches up
    let report = cleaner.expire(now + 7_200).await?;
    assert_eq!(report.processed, 0);
    assert_eq!(report.failed, 0);
    let doc = p.index.get_document(&id).await?.expect("kept");
    assert_eq!(doc["status"], "deleted");
    assert_eq!(doc["last_updated"], json!(now + 7_200));
    Ok(())
}

#[tokio::test]
async fn test_failed_index_delete_is_retried_on_redelivery() -> anyhow::Result<()> {
    let p = Pipeline::new().await?;
    p.start().await?;
    p.host.publish(URL, bakery());
    let id = p.service.add(URL).await?;
    p.settle().await;
    assert!(p.index.get_document(&id).await?.is_some());

    // The profile loses its name and the first index delete fails
    p.host.publish(URL, json!({ "linked_schemas": ["organizations-v1.0.0"] }));
    FlakyIndex::fail_next(&p.index.failing_deletes, 1);
    p.service.add(URL).await?;
    p.settle().await;

    assert_eq!(p.index.failing_deletes.load(Ordering::SeqCst), 0);
    assert_eq!(p.service.get(&id).await?.status, NodeStatus::ValidationFailed);
    assert!(p.index.get_document(&id).await?.is_none());
    Ok(())
}
