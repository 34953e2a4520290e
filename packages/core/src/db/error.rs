//! Database Error Types
//!
//! Error types for both repositories: the authoritative document store and
//! the search index projection. A conditional write that matches no document
//! is not represented here; repositories report it as `Ok(None)`.

use thiserror::Error;

/// Repository operation errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish a connection (fatal at startup)
    #[error("Failed to connect to {target} at {endpoint}: {reason}")]
    ConnectionFailed {
        target: &'static str,
        endpoint: String,
        reason: String,
    },

    /// Record missing on a read
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// Document store query failed
    #[error("{context}: {source}")]
    QueryFailed {
        context: String,
        #[source]
        source: surrealdb::Error,
    },

    /// Search index request failed
    #[error("Search index request failed: {context}")]
    IndexRequestFailed { context: String },

    /// Store answered with something other than what the statement promises
    #[error("Unexpected store response: {0}")]
    UnexpectedResponse(String),

    /// Record or document could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(
        target: &'static str,
        endpoint: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::ConnectionFailed {
            target,
            endpoint: endpoint.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Wrap a SurrealDB error with context
    ///
    /// Returns a closure so call sites read `.map_err(DatabaseError::query("..."))`.
    pub fn query(context: impl Into<String>) -> impl FnOnce(surrealdb::Error) -> Self {
        let context = context.into();
        move |source| Self::QueryFailed { context, source }
    }

    /// Create a search index request error
    pub fn index_request(context: impl Into<String>) -> Self {
        Self::IndexRequestFailed {
            context: context.into(),
        }
    }

    pub fn unexpected_response(msg: impl Into<String>) -> Self {
        Self::UnexpectedResponse(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for DatabaseError {
    fn from(err: reqwest::Error) -> Self {
        Self::index_request(err.to_string())
    }
}
