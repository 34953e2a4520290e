//! Search Index Layer
//!
//! The search index is a materialized, eventually consistent projection of
//! the document store, keyed by the same node id.
//!
//! - [`SearchIndex`] - repository trait used by the node service and jobs
//! - [`query`] - query parameter types and the request body builder
//! - [`pagination`] - offset arithmetic and the result window ceiling
//! - [`ElasticIndex`] / [`MemoryIndex`] - backends

mod elastic;
mod index;
mod memory;
pub mod pagination;
pub mod query;

pub use elastic::ElasticIndex;
pub use index::{DeleteFilter, ExportResults, MapPoint, MapResults, SearchIndex, SearchResults};
pub use memory::{parse_distance, MemoryIndex};
pub use query::{ExportQuery, QueryBuilder, SearchQuery};
