//! HTTP API
//!
//! A thin request/response mapping over [`NodeService`]. Every response is a
//! JSON:API document (`data`, `errors`, `links`, `meta`).
//!
//! # Architecture
//!
//! Endpoint modules each expose `routes(state)`, merged here:
//! - `node_endpoints`: add, get, delete, search, map markers, export, ping
//! - `validate_endpoints`: dry-run validation

use axum::Router;
use murmur_core::NodeService;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

mod http_error;
pub mod jsonapi;
mod node_endpoints;
mod validate_endpoints;

pub use http_error::ApiError;
pub use node_endpoints::parse_query;

/// Application state shared across all endpoints
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NodeService>,
    /// Retention of deleted nodes, rendered for delete responses
    pub deleted_ttl: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(node_endpoints::routes(state.clone()))
        .merge(validate_endpoints::routes(state))
        .layer(TraceLayer::new_for_http())
}

/// Serve the API on `addr` until `shutdown` resolves
///
/// # Errors
///
/// Returns error if the listener cannot bind or the server fails.
pub async fn start_server<F>(state: AppState, addr: &str, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Index API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
