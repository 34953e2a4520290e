//! Configuration loading.
//!
//! Values come from built-in defaults, then an optional `config/murmur` file,
//! then `MURMUR__SECTION__FIELD` environment variables.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE: &str = "config/murmur";
const ENV_PREFIX: &str = "MURMUR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MurmurConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Document store connection
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `mem://`, `rocksdb://<path>` or `http(s)://<host>`
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl StoreConfig {
    /// `true` for engines living inside this process (`mem://`, `rocksdb://`, ...)
    ///
    /// An embedded rocksdb directory is locked by the process that opened it.
    pub fn is_embedded(&self) -> bool {
        let scheme = self.endpoint.split("://").next().unwrap_or_default();
        !matches!(scheme, "http" | "https" | "ws" | "wss")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "rocksdb://data/murmur.db".to_string(),
            namespace: "murmur".to_string(),
            database: "index".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    Elasticsearch,
    Memory,
}

/// Search index connection and query tuning
#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    pub url: String,
    pub index_name: String,
    /// Fuzziness for non-exact tag matching (`AUTO` or an edit distance)
    pub tags_fuzziness: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Elasticsearch,
            url: "http://localhost:9200".to_string(),
            index_name: "nodes".to_string(),
            tags_fuzziness: "AUTO".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LibraryConfig {
    pub url: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    pub tags_array_size: usize,
    pub tags_string_length: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            tags_array_size: 100,
            tags_string_length: 100,
        }
    }
}

/// Retention windows, in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct TtlConfig {
    pub deleted_secs: i64,
    pub validation_failed_secs: i64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            deleted_secs: 90 * 24 * 60 * 60,
            validation_failed_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl TtlConfig {
    /// Deleted-retention rendered for API messages, e.g. "90 days"
    pub fn deleted_ttl_display(&self) -> String {
        let days = self.deleted_secs / 86_400;
        if days >= 1 {
            format!("{} days", days)
        } else {
            format!("{} seconds", self.deleted_secs)
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    pub interval_secs: u64,
    pub revalidate_page_size: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            revalidate_page_size: 100,
        }
    }
}

impl JobsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Message bus delivery policy
#[derive(Debug, Deserialize, Clone)]
pub struct BusConfig {
    pub ack_wait_ms: u64,
    pub max_deliver: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ack_wait_ms: 30_000,
            max_deliver: 10,
        }
    }
}

impl BusConfig {
    pub fn ack_wait(&self) -> Duration {
        Duration::from_millis(self.ack_wait_ms)
    }
}

/// Outbound HTTP clients
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    /// Profile bodies larger than this are treated as unreadable
    #[serde(default = "default_max_profile_bytes")]
    pub max_profile_bytes: usize,
}

fn default_max_profile_bytes() -> usize {
    1024 * 1024
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_profile_bytes: default_max_profile_bytes(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Host accepted in profile URLs even though it has no dot
    pub internal_gateway_alias: String,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            internal_gateway_alias: "data-proxy-app".to_string(),
        }
    }
}

impl MurmurConfig {
    /// Check cross-field constraints the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search.backend == SearchBackend::Elasticsearch && self.search.url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "search.url is required for the elasticsearch backend".to_string(),
            ));
        }
        if self.ttl.deleted_secs <= 0 || self.ttl.validation_failed_secs <= 0 {
            return Err(ConfigError::Invalid("ttl values must be positive".to_string()));
        }
        if self.jobs.revalidate_page_size == 0 {
            return Err(ConfigError::Invalid(
                "jobs.revalidate_page_size must be at least 1".to_string(),
            ));
        }
        if self.jobs.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "jobs.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.bus.max_deliver == 0 {
            return Err(ConfigError::Invalid("bus.max_deliver must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Refuse embedded stores for processes that run beside the server
    ///
    /// The standalone reconcile run cannot open a rocksdb directory that a
    /// running index server holds, and a `mem://` store would be empty.
    pub fn require_shared_store(&self) -> Result<(), ConfigError> {
        if self.store.is_embedded() {
            return Err(ConfigError::Invalid(format!(
                "store.endpoint {} is embedded; standalone reconciliation needs a remote \
                 document store (http(s):// or ws(s)://). With an embedded store the index \
                 server runs these jobs itself on jobs.interval_secs",
                self.store.endpoint
            )));
        }
        Ok(())
    }
}

/// Load configuration from defaults, the optional file and the environment
pub fn load() -> Result<MurmurConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let cfg: MurmurConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
