//! Node Endpoints
//!
//! # Endpoints
//!
//! - `POST /nodes` - submit a profile URL
//! - `GET /nodes/:id` - node status, or its validation failure reasons
//! - `DELETE /nodes/:id` - soft-delete a node whose profile is gone
//! - `GET /nodes` - search
//! - `GET /get-nodes` - map markers
//! - `POST /export` - cursor export
//! - `GET /ping` - liveness probe

use axum::{
    extract::{rejection::JsonRejection, Path, RawQuery, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use murmur_core::models::{NodeStatus, ValidationError, MAX_RESULTS_DETAIL};
use murmur_core::search::pagination;
use murmur_core::search::query::{EXPORT_FIELDS, SEARCH_FIELDS};
use murmur_core::search::{ExportQuery, SearchQuery};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::api::jsonapi::{Document, Links};
use crate::api::{ApiError, AppState};

const POST_FAILED_MESSAGE: &str =
    "The system will automatically re-post the node, please check back in a minute.";

async fn ping() -> Json<Value> {
    Json(json!({ "data": "pong" }))
}

/// `POST /nodes {"profile_url": "..."}`
async fn add_node(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Document>, ApiError> {
    let Json(body) = body?;
    let profile_url = body
        .get("profile_url")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| {
            ValidationError::missing_field("profile_url", "The `profile_url` property is required.")
        })?;

    let id = state.service.add(profile_url).await?;
    Ok(Json(Document::data(json!({
        "id": id,
        "profile_url": profile_url.trim(),
        "status": NodeStatus::Received.as_str(),
    }))))
}

async fn get_node(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response, ApiError> {
    let node = state.service.get(&id).await?;

    if node.status == NodeStatus::ValidationFailed {
        let status = node
            .failure_reasons
            .first()
            .and_then(|r| StatusCode::from_u16(r.status).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);
        let err = ApiError::new(status, node.failure_reasons).with_meta(json!({
            "node_id": node.id,
            "profile_url": node.profile_url,
        }));
        return Ok(err.into_response());
    }

    let mut doc = Document::data(json!({
        "id": node.id,
        "profile_url": node.profile_url,
        "profile_hash": node.profile_hash,
        "status": node.status,
        "last_updated": node.last_updated,
    }));
    if node.status == NodeStatus::PostFailed {
        doc = doc.with_meta(json!({ "message": POST_FAILED_MESSAGE }));
    }
    Ok(Json(doc).into_response())
}

async fn delete_node(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Document>, ApiError> {
    let profile_url = state.service.delete(&id).await?;
    Ok(Json(Document::meta(json!({
        "message": format!(
            "The Index has recorded as deleted the profile that was previously posted at: {} -- It will be completely removed from the index in {}.",
            profile_url, state.deleted_ttl
        ),
    }))))
}

/// Parse a query string, rejecting names outside `allowed`
///
/// A value that does not fit its field's type is reported against that
/// parameter.
pub fn parse_query<T: DeserializeOwned>(raw: Option<&str>, allowed: &[&str]) -> Result<T, ValidationError> {
    let raw = raw.unwrap_or_default();
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw)
        .map_err(|_| ValidationError::invalid_query_parameter(raw))?;

    for (key, value) in &pairs {
        if !allowed.contains(&key.as_str()) {
            return Err(ValidationError::invalid_query_parameter(key.clone()));
        }
        let single = serde_urlencoded::to_string([(key, value)])
            .map_err(|_| ValidationError::invalid_query_parameter(key.clone()))?;
        if serde_urlencoded::from_str::<T>(&single).is_err() {
            return Err(ValidationError::invalid_query_parameter(key.clone()));
        }
    }

    serde_urlencoded::from_str(raw).map_err(|_| ValidationError::invalid_query_parameter(raw))
}

/// `links` and `meta` for one page, or `None` when the page is past the end
fn page_envelope(
    uri: &Uri,
    headers: &HeaderMap,
    page: i64,
    page_size: i64,
    number_of_results: i64,
    total_pages: i64,
) -> Option<(Links, Value)> {
    if total_pages == 0 || page > total_pages {
        return None;
    }
    let (last_page, capped) = pagination::last_usable_page(total_pages, page_size);
    let links = Links::paginate(uri, headers, page, last_page);

    let mut meta = Map::new();
    if capped {
        meta.insert("message".to_string(), json!(MAX_RESULTS_DETAIL));
    }
    meta.insert("number_of_results".to_string(), json!(number_of_results));
    meta.insert("total_pages".to_string(), json!(total_pages));
    Some((links, Value::Object(meta)))
}

async fn search_nodes(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Document>, ApiError> {
    let query: SearchQuery = parse_query(raw.as_deref(), SEARCH_FIELDS)?;
    let results = state.service.search(&query).await?;

    let mut doc = Document::data(results.result);
    if let Some((links, meta)) = page_envelope(
        &uri,
        &headers,
        query.page,
        query.search_size(),
        results.number_of_results,
        results.total_pages,
    ) {
        doc = doc.with_links(links).with_meta(meta);
    }
    Ok(Json(doc))
}

async fn get_nodes(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<Document>, ApiError> {
    let query: SearchQuery = parse_query(raw.as_deref(), SEARCH_FIELDS)?;
    let results = state.service.get_nodes(&query).await?;

    let points = serde_json::to_value(&results.result).map_err(|e| {
        tracing::error!("Failed to serialize map points: {}", e);
        ApiError::unknown()
    })?;
    let mut doc = Document::data(points);
    if let Some((links, meta)) = page_envelope(
        &uri,
        &headers,
        query.page,
        query.map_size(),
        results.number_of_results,
        results.total_pages,
    ) {
        doc = doc.with_links(links).with_meta(meta);
    }
    Ok(Json(doc))
}

/// `POST /export {"schema", "page_size", "search_after"}`
async fn export_nodes(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Document>, ApiError> {
    let Json(body) = body?;
    let fields = match body {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        _ => return Err(ApiError::json()),
    };
    if let Some(unknown) = fields.keys().find(|k| !EXPORT_FIELDS.contains(&k.as_str())) {
        return Err(ValidationError::invalid_query_parameter(unknown.clone()).into());
    }
    let query: ExportQuery = serde_json::from_value(Value::Object(fields)).map_err(|e| {
        tracing::debug!("Invalid export body: {}", e);
        ApiError::json()
    })?;

    let results = state.service.export(&query).await?;
    Ok(Json(
        Document::data(results.result).with_meta(json!({ "sort": results.sort })),
    ))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/nodes", post(add_node).get(search_nodes))
        .route("/nodes/:id", get(get_node).delete(delete_node))
        .route("/get-nodes", get(get_nodes))
        .route("/export", post(export_nodes))
        .with_state(state)
}
