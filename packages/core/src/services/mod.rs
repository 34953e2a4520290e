//! Business Services
//!
//! This module contains the lifecycle logic and its outbound collaborators:
//!
//! - `NodeService` - add/get/delete/search/export and validation outcomes
//! - `Enricher` - turns a validated profile into its index document
//! - `ProfileFetcher` - one GET against a profile host
//! - `LibraryClient` - countries and schemas from the library service
//!
//! Services coordinate between the repositories and the message bus; the
//! API and the event listeners are thin layers over them.

pub mod enrichment;
pub mod error;
pub mod library;
pub mod node_service;
pub mod profile_fetcher;
pub mod profile_url;

pub use enrichment::Enricher;
pub use error::{DeleteErrorCode, DeleteNodeError, NodeServiceError};
pub use library::{
    CountryLookup, LibraryClient, LibrarySchemaValidator, SchemaValidator, DEFAULT_SCHEMA,
};
pub use node_service::{NodeService, NodeServiceDeps};
pub use profile_fetcher::{FetchError, HttpProfileFetcher, ProfileFetcher, ProfileResponse};
pub use profile_url::validate_profile_url;
