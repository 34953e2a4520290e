//! Service Layer Error Types
//!
//! This module defines error types for service-layer operations. The API
//! maps each variant to one response status; event handlers log them and
//! leave the message unacknowledged.
//!
//! A conditional write that lost its race is not an error and never appears
//! here.

use crate::db::DatabaseError;
use crate::events::BusError;
use crate::models::ValidationError;
use std::fmt;
use thiserror::Error;

/// Why a delete was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteErrorCode {
    /// The profile URL still serves a JSON document
    ProfileStillExists = 1,
    /// The profile host could not be connected to
    ProfileUrlNotFound = 2,
    /// The profile URL check failed for another reason
    ProfileUrlCannotBeChecked = 3,
}

impl DeleteErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for DeleteErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Delete precondition failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{title} (code {code}): {detail}")]
pub struct DeleteNodeError {
    pub title: String,
    pub detail: String,
    pub node_id: String,
    pub profile_url: String,
    pub code: DeleteErrorCode,
}

impl DeleteNodeError {
    pub fn still_exists(node_id: &str, profile_url: &str, detail: impl Into<String>) -> Self {
        Self {
            title: "Profile Still Exists".to_string(),
            detail: detail.into(),
            node_id: node_id.to_string(),
            profile_url: profile_url.to_string(),
            code: DeleteErrorCode::ProfileStillExists,
        }
    }

    pub fn url_not_found(node_id: &str, profile_url: &str) -> Self {
        Self {
            title: "Profile URL Not Found".to_string(),
            detail: format!(
                "There was an error when trying to reach {} to delete node_id: {}",
                profile_url, node_id
            ),
            node_id: node_id.to_string(),
            profile_url: profile_url.to_string(),
            code: DeleteErrorCode::ProfileUrlNotFound,
        }
    }

    pub fn cannot_be_checked(node_id: &str, profile_url: &str) -> Self {
        Self {
            title: "Profile URL Cannot Be Checked".to_string(),
            detail: format!(
                "There was an error when trying to check {} to delete node_id: {}",
                profile_url, node_id
            ),
            node_id: node_id.to_string(),
            profile_url: profile_url.to_string(),
            code: DeleteErrorCode::ProfileUrlCannotBeChecked,
        }
    }
}

/// Service operation errors
#[derive(Error, Debug)]
pub enum NodeServiceError {
    /// Bad client input
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Node not found by ID
    #[error("Node not found: {id}")]
    NotFound { id: String },

    /// Store or index failure
    #[error("Database operation failed: {0}")]
    Database(DatabaseError),

    /// Delete precondition failed
    #[error("Delete refused: {0}")]
    DeleteNode(#[from] DeleteNodeError),

    /// Message could not be published
    #[error("Publish failed: {0}")]
    Bus(#[from] BusError),

    /// An event payload that cannot be applied
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
}

impl NodeServiceError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        Self::InvalidEvent(msg.into())
    }
}

impl From<DatabaseError> for NodeServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { id } => Self::NotFound { id },
            other => Self::Database(other),
        }
    }
}
