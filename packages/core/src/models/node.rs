//! Node Record
//!
//! This module defines the `Node` struct, the registry entry that points at an
//! externally hosted JSON profile, together with its lifecycle status and the
//! structured failure reasons produced by the validator.
//!
//! # Lifecycle
//!
//! ```text
//! received ──► validated ──► posted ◄──► post_failed
//!     │                         │             │
//!     └──► validation_failed    └──► deleted ◄┘
//! ```
//!
//! The record itself carries no transition logic. Transitions are applied by
//! `NodeService` in response to bus events or API calls; this module only
//! offers field setters and the identity/hash helpers shared by every layer.
//!
//! # Examples
//!
//! ```rust
//! use murmur_core::models::{Node, NodeStatus};
//!
//! let node = Node::new("https://example.org/profile.json");
//! assert_eq!(node.status, NodeStatus::Received);
//! assert_eq!(node.id.len(), 64);
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for client input
///
/// Each variant renders to a JSON:API error object with a human title, a
/// detail sentence and, for query parameters, the offending parameter name.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Missing required property: {field}")]
    MissingField { field: String, detail: String },

    #[error("Invalid profile URL: {url}")]
    InvalidProfileUrl { url: String },

    #[error("Invalid query parameter: {parameter}")]
    InvalidQueryParameter { parameter: String },

    #[error("Max results exceeded: page {page} with page_size {page_size}")]
    MaxResultsExceeded { page: i64, page_size: i64 },

    #[error("Invalid expires field: {expires}")]
    InvalidExpires { expires: i64 },

    #[error("Malformed JSON document: {0}")]
    MalformedJson(String),

    #[error("Profile failed validation")]
    ProfileRejected(Vec<ErrorObject>),
}

impl ValidationError {
    pub fn missing_field(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_profile_url(url: impl Into<String>) -> Self {
        Self::InvalidProfileUrl { url: url.into() }
    }

    pub fn invalid_query_parameter(parameter: impl Into<String>) -> Self {
        Self::InvalidQueryParameter {
            parameter: parameter.into(),
        }
    }

    /// Convert into the error objects returned to API callers
    pub fn to_error_objects(&self) -> Vec<ErrorObject> {
        match self {
            Self::MissingField { detail, .. } => {
                vec![ErrorObject::bad_request("Missing Required Property", detail)]
            }
            Self::InvalidProfileUrl { .. } => vec![ErrorObject::bad_request(
                "Invalid Profile URL",
                "The `profile_url` is not a valid URL.",
            )],
            Self::InvalidQueryParameter { parameter } => vec![ErrorObject::bad_request(
                "Invalid Query Parameter",
                format!("The following query parameter is not valid: {}", parameter),
            )
            .with_parameter(parameter.clone())],
            Self::MaxResultsExceeded { .. } => vec![ErrorObject::bad_request(
                "Max Results Exceeded",
                MAX_RESULTS_DETAIL,
            )],
            Self::InvalidExpires { .. } => vec![ErrorObject::bad_request(
                "Invalid Expires Field",
                "The `expires` field must be a timestamp in the future.",
            )],
            Self::MalformedJson(_) => vec![ErrorObject::bad_request(
                "JSON Error",
                "The JSON document submitted could not be parsed.",
            )],
            Self::ProfileRejected(reasons) => reasons.clone(),
        }
    }
}

/// Detail sentence attached to every response that touches the result window
pub const MAX_RESULTS_DETAIL: &str = "No more than 10,000 results can be returned. \
Refine your query so it will return less but more relevant results.";

/// Lifecycle status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Received,
    Validated,
    ValidationFailed,
    Posted,
    PostFailed,
    Deleted,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Received => "received",
            NodeStatus::Validated => "validated",
            NodeStatus::ValidationFailed => "validation_failed",
            NodeStatus::Posted => "posted",
            NodeStatus::PostFailed => "post_failed",
            NodeStatus::Deleted => "deleted",
        }
    }

    /// Statuses a search index document may carry
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            NodeStatus::Posted | NodeStatus::PostFailed | NodeStatus::Deleted
        )
    }

    /// Statuses picked up by the revalidation sweep
    pub fn needs_revalidation(&self) -> bool {
        matches!(self, NodeStatus::Received | NodeStatus::PostFailed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(NodeStatus::Received),
            "validated" => Ok(NodeStatus::Validated),
            "validation_failed" => Ok(NodeStatus::ValidationFailed),
            "posted" => Ok(NodeStatus::Posted),
            "post_failed" => Ok(NodeStatus::PostFailed),
            "deleted" => Ok(NodeStatus::Deleted),
            other => Err(format!("unknown node status: {}", other)),
        }
    }
}

/// Location of the input that caused an error
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<String>,
}

/// JSON:API error object
///
/// Used both for API error responses and for the structured validation
/// `failure_reasons` persisted on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ErrorSource>,
    pub title: String,
    #[serde(default)]
    pub detail: String,
}

impl ErrorObject {
    pub fn new(status: u16, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            status,
            source: None,
            title: title.into(),
            detail: detail.into(),
        }
    }

    pub fn bad_request(title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(400, title, detail)
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.source = Some(ErrorSource {
            pointer: None,
            parameter: Some(parameter.into()),
        });
        self
    }

    pub fn with_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.source = Some(ErrorSource {
            pointer: Some(pointer.into()),
            parameter: None,
        });
        self
    }
}

/// Registry entry for an externally hosted profile.
///
/// # Fields
///
/// - `id`: SHA-256 of `profile_url`, shared with the search index document
/// - `profile_url`: immutable after creation
/// - `profile_hash`: hash of the last successfully validated profile
/// - `status`: lifecycle status
/// - `last_updated`: epoch seconds of the last validation or deletion
/// - `failure_reasons`: non-empty only while `status = validation_failed`
/// - `version`: optimistic concurrency token, owned by the document store
/// - `created_at`: epoch seconds of first insertion
/// - `expires`: optional epoch seconds after which the node is expired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub profile_url: String,
    #[serde(default)]
    pub profile_hash: Option<String>,
    pub status: NodeStatus,
    #[serde(default)]
    pub last_updated: Option<i64>,
    #[serde(default)]
    pub failure_reasons: Vec<ErrorObject>,
    #[serde(default)]
    pub version: Option<i64>,
    pub created_at: i64,
    #[serde(default)]
    pub expires: Option<i64>,
}

impl Node {
    /// Create a freshly received node for a profile URL
    pub fn new(profile_url: impl Into<String>) -> Self {
        let profile_url = profile_url.into();
        Self {
            id: node_id(&profile_url),
            profile_url,
            profile_hash: None,
            status: NodeStatus::Received,
            last_updated: None,
            failure_reasons: Vec::new(),
            version: None,
            created_at: Utc::now().timestamp(),
            expires: None,
        }
    }

    pub fn set_status(&mut self, status: NodeStatus) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_profile_hash(&mut self, hash: Option<String>) -> &mut Self {
        self.profile_hash = hash;
        self
    }

    pub fn set_last_updated(&mut self, last_updated: Option<i64>) -> &mut Self {
        self.last_updated = last_updated;
        self
    }

    pub fn set_failure_reasons(&mut self, reasons: Vec<ErrorObject>) -> &mut Self {
        self.failure_reasons = reasons;
        self
    }

    pub fn set_version(&mut self, version: Option<i64>) -> &mut Self {
        self.version = version;
        self
    }

    pub fn set_expires(&mut self, expires: Option<i64>) -> &mut Self {
        self.expires = expires;
        self
    }

    /// True once `expires` is set and not later than `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }
}

/// Stable node identifier derived from the profile URL
pub fn node_id(profile_url: &str) -> String {
    sha256_hex(profile_url.as_bytes())
}

/// Content hash of a profile document
///
/// The profile is hashed in its compact JSON form so that formatting changes
/// on the hosting side do not register as content changes.
pub fn profile_hash(profile: &serde_json::Value) -> String {
    sha256_hex(compact_json(profile).as_bytes())
}

/// Compact serialization of a profile document
pub fn compact_json(profile: &serde_json::Value) -> String {
    // Display for Value never fails and emits the compact form
    profile.to_string()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
