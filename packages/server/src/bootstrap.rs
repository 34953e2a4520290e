//! Process wiring shared by the binaries
//!
//! Connects both stores with bounded backoff (startup fails once the budget
//! is spent), builds the collaborators and hands out the pieces each process
//! needs.

use anyhow::Context;
use murmur_core::backoff::BackoffPolicy;
use murmur_core::config::{MurmurConfig, SearchBackend};
use murmur_core::db::{NodeStore, SurrealStore};
use murmur_core::events::{start_index_listeners, start_validation_worker, InMemoryBus};
use murmur_core::jobs::ReconciliationJobs;
use murmur_core::search::{ElasticIndex, MemoryIndex, SearchIndex};
use murmur_core::services::{
    HttpProfileFetcher, LibraryClient, LibrarySchemaValidator, NodeService, NodeServiceDeps,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;

/// `RUST_LOG`-driven logging, `info` by default
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Connected collaborators of one process
pub struct Runtime {
    pub config: MurmurConfig,
    pub store: Arc<dyn NodeStore>,
    pub index: Arc<dyn SearchIndex>,
    pub bus: Arc<InMemoryBus>,
    pub fetcher: Arc<HttpProfileFetcher>,
    pub library: LibraryClient,
    pub service: Arc<NodeService>,
}

impl Runtime {
    pub async fn connect(config: MurmurConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let policy = BackoffPolicy::default();

        let store: Arc<dyn NodeStore> = Arc::new(
            SurrealStore::connect(&config.store, &policy)
                .await
                .context("document store is unavailable")?,
        );

        let index: Arc<dyn SearchIndex> = match config.search.backend {
            SearchBackend::Elasticsearch => Arc::new(
                ElasticIndex::connect(&config.search, &config.http, &policy)
                    .await
                    .context("search index is unavailable")?,
            ),
            SearchBackend::Memory => {
                tracing::warn!("Using the in-memory search index; documents are not persisted");
                Arc::new(MemoryIndex::new(config.search.tags_fuzziness.clone()))
            }
        };

        let bus = Arc::new(InMemoryBus::new(&config.bus));
        let fetcher = Arc::new(HttpProfileFetcher::new(&config.http)?);
        let library = LibraryClient::new(&config.library, &config.http)?;

        let service = Arc::new(NodeService::new(
            NodeServiceDeps {
                store: store.clone(),
                index: index.clone(),
                bus: bus.clone(),
                fetcher: fetcher.clone(),
                countries: Arc::new(library.clone()),
                validator: Arc::new(LibrarySchemaValidator::new(library.clone())),
            },
            &config,
        ));

        Ok(Self {
            config,
            store,
            index,
            bus,
            fetcher,
            library,
            service,
        })
    }

    pub fn app_state(&self) -> AppState {
        AppState {
            service: self.service.clone(),
            deleted_ttl: self.config.ttl.deleted_ttl_display(),
        }
    }

    /// Start the validation worker and the index listeners on the bus
    pub async fn start_pipeline(&self) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut handles = start_index_listeners(self.bus.as_ref(), self.service.clone()).await?;
        handles.push(
            start_validation_worker(
                self.bus.clone(),
                self.fetcher.clone(),
                Arc::new(LibrarySchemaValidator::new(self.library.clone())),
            )
            .await?,
        );
        Ok(handles)
    }

    pub fn reconciliation_jobs(&self) -> ReconciliationJobs {
        ReconciliationJobs::new(
            self.store.clone(),
            self.index.clone(),
            self.bus.clone(),
            &self.config,
        )
    }
}
