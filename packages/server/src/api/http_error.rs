//! HTTP error handling for the API
//!
//! Every failure is rendered as a JSON:API document with an `errors` array.
//! Store and unexpected failures are logged with their full cause and
//! answered with a generic message.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use murmur_core::models::{ErrorObject, ValidationError};
use murmur_core::services::NodeServiceError;
use serde_json::{json, Value};

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub errors: Vec<ErrorObject>,
    pub meta: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, errors: Vec<ErrorObject>) -> Self {
        Self {
            status,
            errors,
            meta: None,
        }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            vec![ErrorObject::new(
                404,
                "Node Not Found",
                format!("Could not locate the following node_id in the Index: {}", id),
            )],
        )
    }

    pub fn database() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![ErrorObject::new(500, "Database Error", "An internal error was logged.")],
        )
    }

    pub fn unknown() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            vec![ErrorObject::new(
                500,
                "Unknown Error",
                "An unexpected error occurred. Please try again later.",
            )],
        )
    }

    pub fn json() -> Self {
        Self::from(ValidationError::MalformedJson(String::new()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "errors": self.errors });
        if let Some(meta) = self.meta {
            body["meta"] = meta;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let errors = err.to_error_objects();
        // Rejections carry the validator's own statuses
        let status = errors
            .first()
            .and_then(|e| StatusCode::from_u16(e.status).ok())
            .unwrap_or(StatusCode::BAD_REQUEST);
        Self::new(status, errors)
    }
}

impl From<NodeServiceError> for ApiError {
    fn from(err: NodeServiceError) -> Self {
        match err {
            NodeServiceError::Validation(e) => e.into(),
            NodeServiceError::NotFound { id } => Self::not_found(&id),
            NodeServiceError::DeleteNode(e) => Self::new(
                StatusCode::BAD_REQUEST,
                vec![ErrorObject::bad_request(e.title.clone(), e.detail.clone())],
            )
            .with_meta(json!({
                "node_id": e.node_id,
                "profile_url": e.profile_url,
                "error_code": e.code.code(),
            })),
            NodeServiceError::Database(e) => {
                tracing::error!("Database error: {}", e);
                Self::database()
            }
            other => {
                tracing::error!("Unexpected error: {}", other);
                Self::unknown()
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!("Rejected request body: {}", rejection);
        Self::json()
    }
}
