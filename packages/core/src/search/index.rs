//! SearchIndex Trait - Search Index Abstraction
//!
//! The search index is a downstream projection of the document store. It has
//! no concurrency token of its own: every write is a full-document upsert or
//! a partial update keyed by the node id, and deleting something that is not
//! there succeeds.
//!
//! Two implementations exist:
//!
//! - [`ElasticIndex`](super::ElasticIndex): Elasticsearch over HTTP
//! - [`MemoryIndex`](super::MemoryIndex): in-process, for tests and local runs

use crate::db::DatabaseError;
use crate::models::NodeStatus;
use crate::search::query::{ExportQuery, SearchQuery};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// One page of search hits
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub result: Vec<Value>,
    pub number_of_results: i64,
    pub total_pages: i64,
}

/// Map marker, serialized as `[lon, lat, profile_url]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapPoint(pub Value, pub Value, pub Value);

impl MapPoint {
    /// Build from a document holding `geolocation` and `profile_url`
    pub fn from_source(source: &Value) -> Option<Self> {
        let geolocation = source.get("geolocation")?;
        Some(Self(
            geolocation.get("lon").cloned().unwrap_or(Value::Null),
            geolocation.get("lat").cloned().unwrap_or(Value::Null),
            source.get("profile_url").cloned().unwrap_or(Value::Null),
        ))
    }
}

/// One page of map markers
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapResults {
    pub result: Vec<MapPoint>,
    pub number_of_results: i64,
    pub total_pages: i64,
}

/// One page of a cursor export
///
/// `sort` is the sort key of the last hit; pass it back as `search_after`
/// to fetch the next page. `None` once the corpus is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExportResults {
    pub result: Vec<Value>,
    pub sort: Option<Vec<Value>>,
}

/// Bulk removal predicate: `status = status AND last_updated <= before`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteFilter {
    pub status: NodeStatus,
    pub last_updated_before: i64,
}

/// Operations on the search index projection
///
/// # Errors
///
/// Transport and engine failures surface as `DatabaseError`. A missing
/// document on update or delete is not an error.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Full upsert of an enriched document under the node id
    async fn index_by_id(&self, id: &str, document: &Value) -> Result<(), DatabaseError>;

    /// Filtered, paginated search sorted by relevance then `primary_url`
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, DatabaseError>;

    /// Same filtering as `search`, restricted to documents with a geolocation
    async fn get_nodes(&self, query: &SearchQuery) -> Result<MapResults, DatabaseError>;

    /// Cursor page sorted by `(last_updated, profile_url)`
    async fn export(&self, query: &ExportQuery) -> Result<ExportResults, DatabaseError>;

    /// Merge `partial` into an existing document
    async fn update(&self, id: &str, partial: &Value) -> Result<(), DatabaseError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), DatabaseError>;

    /// Remove every document matching `filter`; returns the removed count
    async fn delete_many(&self, filter: &DeleteFilter) -> Result<u64, DatabaseError>;

    /// Mark every `posted` document with `expires <= now` as `deleted`;
    /// returns the updated count
    async fn update_status_by_expiration(&self, now: i64) -> Result<u64, DatabaseError>;

    /// Fetch a stored document, `None` if absent
    async fn get_document(&self, id: &str) -> Result<Option<Value>, DatabaseError>;
}
