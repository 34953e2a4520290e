//! Data Models
//!
//! - `Node` - registry entry pointing at an externally hosted profile
//! - `NodeStatus` - lifecycle status shared by both stores
//! - `ErrorObject` - JSON:API error object, also used for validation failure reasons

mod node;

pub use node::{
    compact_json, node_id, profile_hash, ErrorObject, ErrorSource, Node, NodeStatus,
    ValidationError, MAX_RESULTS_DETAIL,
};
