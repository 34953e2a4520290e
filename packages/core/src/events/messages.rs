//! Bus message payloads
//!
//! Every message carries the node `version` it was computed against, which
//! is what makes duplicate and out-of-order delivery safe downstream.

use crate::models::ErrorObject;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const NODE_CREATED: &str = "node:created";
pub const NODE_VALIDATED: &str = "node:validated";
pub const NODE_VALIDATION_FAILED: &str = "node:validation_failed";

/// A JSON payload bound to one subject
pub trait BusMessage: Serialize + DeserializeOwned + Send + Sync {
    const SUBJECT: &'static str;
}

/// A node was added and needs validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeCreated {
    pub profile_url: String,
    pub version: i64,
}

impl BusMessage for NodeCreated {
    const SUBJECT: &'static str = NODE_CREATED;
}

/// The profile passed validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeValidated {
    pub profile_url: String,
    pub profile_hash: String,
    /// Compact JSON of the validated profile
    pub profile_str: String,
    pub last_updated: i64,
    pub version: i64,
}

impl BusMessage for NodeValidated {
    const SUBJECT: &'static str = NODE_VALIDATED;
}

/// The profile failed validation or could not be fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeValidationFailed {
    pub profile_url: String,
    pub failure_reasons: Vec<ErrorObject>,
    pub version: i64,
}

impl BusMessage for NodeValidationFailed {
    const SUBJECT: &'static str = NODE_VALIDATION_FAILED;
}
