//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - querybase.toml (default configuration)
//! - querybase.local.toml (git-ignored local overrides)
//! - Environment variables (QUERYBASE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # querybase.toml
//! [datasource]
//! url = "postgres://analytics@warehouse:5432/analytics"
//!
//! [cache]
//! backend = "redis"
//! redis_url = "redis://cache:6379/0"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERYBASE_SERVER__PORT=9090
//! QUERYBASE_CACHE__BACKEND=memory
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audit::AuditSettings;
use crate::catalog::RefreshPolicy;

const ENV_PREFIX: &str = "QUERYBASE_";

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub datasource: DataSourceConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins (empty = same-origin only, unless cors_allow_all is true)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Explicitly allow all CORS origins (dev mode opt-in)
    #[serde(default)]
    pub cors_allow_all: bool,

    /// Grace period for in-flight requests and the audit drain on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

/// Result cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Shared Redis instance
    Redis,
    /// In-process LRU; per-instance only
    #[default]
    Memory,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackendKind,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// TTL used when a definition's `cache_ttl` is 0
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Capacity of the in-process backend
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,
}

/// Analytical data source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(default = "default_datasource_url")]
    pub url: String,

    #[serde(default = "default_datasource_pool_size")]
    pub pool_size: usize,
}

/// Where query definitions come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogSource {
    /// `queries` / `query_parameters` tables
    #[default]
    Postgres,
    /// A TOML file of `[[queries]]`
    File,
}

/// Catalog refresh mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CatalogRefresh {
    #[default]
    OnDemand,
    LoadOnce,
    Periodic,
}

/// Query catalog configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub source: CatalogSource,

    /// Catalog database; defaults to the data source URL
    #[serde(default)]
    pub url: Option<String>,

    /// Definitions file for `source = "file"`
    #[serde(default)]
    pub file: Option<PathBuf>,

    #[serde(default = "default_catalog_pool_size")]
    pub pool_size: usize,

    #[serde(default)]
    pub refresh: CatalogRefresh,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// Execution audit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_audit_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_audit_workers")]
    pub workers: usize,

    /// Per-record write deadline in milliseconds
    #[serde(default = "default_audit_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Query execution defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Deadline used when a definition's `timeout_seconds` is 0
    #[serde(default = "default_query_timeout_secs")]
    pub default_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Also write logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_datasource_url() -> String {
    "postgres://querybase@localhost:5432/querybase".to_string()
}

fn default_datasource_pool_size() -> usize {
    16
}

fn default_catalog_pool_size() -> usize {
    4
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_audit_queue_capacity() -> usize {
    1024
}

fn default_audit_workers() -> usize {
    2
}

fn default_audit_write_timeout_ms() -> u64 {
    5_000
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. querybase.toml (base configuration)
    /// 2. querybase.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUERYBASE_* prefix)
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract(
            Self::base()
                .merge(Toml::file("querybase.toml"))
                .merge(Toml::file("querybase.local.toml"))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Load configuration from specific file path
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::extract(
            Self::base()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn base() -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
    }

    /// Extract from an assembled figment and validate
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot start
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datasource.url.trim().is_empty() {
            return Err(ConfigError::Invalid("datasource.url must be set".to_string()));
        }
        if self.cache.backend == CacheBackendKind::Redis && self.cache.redis_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "cache.redis_url must be set when cache.backend = \"redis\"".to_string(),
            ));
        }
        if self.catalog.source == CatalogSource::File && self.catalog.file.is_none() {
            return Err(ConfigError::Invalid(
                "catalog.file must be set when catalog.source = \"file\"".to_string(),
            ));
        }
        if self.catalog.refresh == CatalogRefresh::Periodic && self.catalog.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "catalog.refresh_interval_secs must be positive for periodic refresh".to_string(),
            ));
        }
        if self.query.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "query.default_timeout_secs must be positive".to_string(),
            ));
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.default_ttl_secs must be positive".to_string(),
            ));
        }
        if self.audit.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "audit.write_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Database holding the catalog and audit tables
    pub fn catalog_url(&self) -> &str {
        self.catalog.url.as_deref().unwrap_or(&self.datasource.url)
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl CatalogConfig {
    pub fn refresh_policy(&self) -> RefreshPolicy {
        match self.refresh {
            CatalogRefresh::OnDemand => RefreshPolicy::OnDemand,
            CatalogRefresh::LoadOnce => RefreshPolicy::LoadOnce,
            CatalogRefresh::Periodic => {
                RefreshPolicy::Periodic(Duration::from_secs(self.refresh_interval_secs))
            }
        }
    }
}

impl AuditConfig {
    pub fn settings(&self) -> AuditSettings {
        AuditSettings {
            queue_capacity: self.queue_capacity,
            workers: self.workers,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

impl QueryConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            cors_allow_all: false,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            backend: CacheBackendKind::default(),
            redis_url: default_redis_url(),
            default_ttl_secs: default_cache_ttl_secs(),
            max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        DataSourceConfig {
            url: default_datasource_url(),
            pool_size: default_datasource_pool_size(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            source: CatalogSource::default(),
            url: None,
            file: None,
            pool_size: default_catalog_pool_size(),
            refresh: CatalogRefresh::default(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            enabled: true,
            queue_capacity: default_audit_queue_capacity(),
            workers: default_audit_workers(),
            write_timeout_ms: default_audit_write_timeout_ms(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
