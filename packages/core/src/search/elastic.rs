//! ElasticIndex - SearchIndex over the Elasticsearch REST API
//!
//! Requests are plain JSON over `reqwest`; query bodies come from
//! [`SearchQuery`] and [`ExportQuery`]. A 404 on update or delete means the
//! document (or the whole index) is absent and is treated as success.

use crate::backoff::{retry_with_backoff, BackoffPolicy};
use crate::config::{HttpConfig, SearchConfig};
use crate::db::DatabaseError;
use crate::models::NodeStatus;
use crate::search::index::{
    DeleteFilter, ExportResults, MapPoint, MapResults, SearchIndex, SearchResults,
};
use crate::search::pagination;
use crate::search::query::{ExportQuery, SearchQuery};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    total: TotalHits,
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: i64,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DeleteByQueryResponse {
    #[serde(default)]
    deleted: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateByQueryResponse {
    #[serde(default)]
    updated: u64,
}

/// Elasticsearch-backed search index
#[derive(Clone)]
pub struct ElasticIndex {
    client: Client,
    base_url: String,
    index: String,
    tags_fuzziness: String,
}

impl ElasticIndex {
    pub fn new(search: &SearchConfig, http: &HttpConfig) -> Result<Self, DatabaseError> {
        let client = Client::builder().timeout(http.timeout()).build()?;
        Ok(Self {
            client,
            base_url: search.url.trim_end_matches('/').to_string(),
            index: search.index_name.clone(),
            tags_fuzziness: search.tags_fuzziness.clone(),
        })
    }

    /// Create the client and bootstrap the index, retrying with backoff
    pub async fn connect(
        search: &SearchConfig,
        http: &HttpConfig,
        policy: &BackoffPolicy,
    ) -> Result<Self, DatabaseError> {
        let index = Self::new(search, http)?;
        retry_with_backoff(policy, "Bootstrapping search index", || index.ensure_index())
            .await
            .map_err(|e| DatabaseError::connection_failed("search index", &index.base_url, e))?;
        tracing::info!("Search index '{}' ready at {}", index.index, index.base_url);
        Ok(index)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    /// Index mappings: geo point, epoch-second dates, keywords for sortable fields
    pub fn mappings() -> Value {
        let text_with_keyword = json!({
            "type": "text",
            "fields": { "keyword": { "type": "keyword", "ignore_above": 256 } }
        });
        json!({
            "mappings": {
                "properties": {
                    "geolocation": { "type": "geo_point" },
                    "last_updated": { "type": "date", "format": "epoch_second" },
                    "expires": { "type": "date", "format": "epoch_second" },
                    "profile_url": { "type": "keyword" },
                    "primary_url": { "type": "keyword" },
                    "status": { "type": "keyword" },
                    "linked_schemas": { "type": "keyword" },
                    "name": text_with_keyword,
                    "locality": text_with_keyword,
                    "region": text_with_keyword,
                    "country": text_with_keyword,
                    "tags": text_with_keyword,
                }
            }
        })
    }

    /// Create the index with mappings when it does not exist yet
    pub async fn ensure_index(&self) -> Result<(), DatabaseError> {
        let index_url = format!("{}/{}", self.base_url, self.index);
        let head = self.client.head(&index_url).send().await?;
        if head.status().is_success() {
            return Ok(());
        }
        if head.status() != StatusCode::NOT_FOUND {
            return Err(DatabaseError::index_request(format!(
                "index check returned {}",
                head.status()
            )));
        }

        let resp = self
            .client
            .put(&index_url)
            .json(&Self::mappings())
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            tracing::info!("Created search index '{}'", self.index);
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        // Another instance created it between the HEAD and the PUT
        if status == StatusCode::BAD_REQUEST && body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(DatabaseError::index_request(format!(
            "index creation returned {}: {}",
            status, body
        )))
    }

    async fn expect_success(resp: Response, context: &str) -> Result<Response, DatabaseError> {
        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(DatabaseError::index_request(format!(
                "{} returned {}: {}",
                context, status, body
            )))
        }
    }

    async fn run_search(&self, body: &Value) -> Result<SearchResponse, DatabaseError> {
        let resp = self.client.post(self.url("_search")).json(body).send().await?;
        let resp = Self::expect_success(resp, "search").await?;
        Ok(resp.json::<SearchResponse>().await?)
    }
}

#[async_trait]
impl SearchIndex for ElasticIndex {
    async fn index_by_id(&self, id: &str, document: &Value) -> Result<(), DatabaseError> {
        let resp = self
            .client
            .put(self.url(&format!("_doc/{}", id)))
            .json(document)
            .send()
            .await?;
        Self::expect_success(resp, "index document").await?;
        tracing::debug!("Indexed document {}", id);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, DatabaseError> {
        let response = self.run_search(&query.search_body(&self.tags_fuzziness)).await?;
        let total = response.hits.total.value;
        Ok(SearchResults {
            result: response.hits.hits.into_iter().map(|h| h.source).collect(),
            number_of_results: total,
            total_pages: pagination::total_pages(total, query.search_size()),
        })
    }

    async fn get_nodes(&self, query: &SearchQuery) -> Result<MapResults, DatabaseError> {
        let response = self.run_search(&query.map_body(&self.tags_fuzziness)).await?;
        let total = response.hits.total.value;
        Ok(MapResults {
            result: response
                .hits
                .hits
                .iter()
                .filter_map(|h| MapPoint::from_source(&h.source))
                .collect(),
            number_of_results: total,
            total_pages: pagination::total_pages(total, query.map_size()),
        })
    }

    async fn export(&self, query: &ExportQuery) -> Result<ExportResults, DatabaseError> {
        let response = self.run_search(&query.body()).await?;
        let sort = response.hits.hits.last().and_then(|h| h.sort.clone());
        Ok(ExportResults {
            result: response.hits.hits.into_iter().map(|h| h.source).collect(),
            sort,
        })
    }

    async fn update(&self, id: &str, partial: &Value) -> Result<(), DatabaseError> {
        let resp = self
            .client
            .post(self.url(&format!("_update/{}", id)))
            .json(&json!({ "doc": partial }))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Update skipped, document {} not indexed", id);
            return Ok(());
        }
        Self::expect_success(resp, "update document").await?;
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), DatabaseError> {
        let resp = self
            .client
            .delete(self.url(&format!("_doc/{}", id)))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::expect_success(resp, "delete document").await?;
        Ok(())
    }

    async fn delete_many(&self, filter: &DeleteFilter) -> Result<u64, DatabaseError> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "match": { "status": filter.status.as_str() } },
                        { "range": { "last_updated": { "lte": filter.last_updated_before } } },
                    ]
                }
            }
        });
        let resp = self
            .client
            .post(self.url("_delete_by_query"))
            .json(&body)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let resp = Self::expect_success(resp, "delete by query").await?;
        Ok(resp.json::<DeleteByQueryResponse>().await?.deleted)
    }

    async fn update_status_by_expiration(&self, now: i64) -> Result<u64, DatabaseError> {
        let body = json!({
            "query": {
                "bool": {
                    "must": [
                        { "match": { "status": NodeStatus::Posted.as_str() } },
                        { "range": { "expires": { "lte": now } } },
                    ]
                }
            },
            "script": {
                "source": "ctx._source.status = params.status; ctx._source.last_updated = params.now",
                "lang": "painless",
                "params": { "status": NodeStatus::Deleted.as_str(), "now": now },
            }
        });
        let resp = self
            .client
            .post(self.url("_update_by_query"))
            .query(&[("conflicts", "proceed")])
            .json(&body)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let resp = Self::expect_success(resp, "update by query").await?;
        Ok(resp.json::<UpdateByQueryResponse>().await?.updated)
    }

    async fn get_document(&self, id: &str) -> Result<Option<Value>, DatabaseError> {
        let resp = self
            .client
            .get(self.url(&format!("_doc/{}", id)))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::expect_success(resp, "get document").await?;
        let doc = resp.json::<GetResponse>().await?;
        Ok(if doc.found { doc.source } else { None })
    }
}
