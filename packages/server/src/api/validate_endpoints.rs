//! Dry-run profile validation
//!
//! `POST /validate` checks a profile document against the default schema and
//! its `linked_schemas` without persisting anything.

use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    routing::post,
    Router,
};
use serde_json::{json, Value};

use crate::api::jsonapi::Document;
use crate::api::{ApiError, AppState};

async fn validate_profile(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Document>, ApiError> {
    let Json(profile) = body?;
    state.service.validate_profile(&profile).await?;
    Ok(Json(Document::meta(json!({ "message": "Profile is valid" }))))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/validate", post(validate_profile))
        .with_state(state)
}
