//! `QueryBase` Server Binary
//!
//! Serves the query catalog over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! # Start with querybase.toml / QUERYBASE_* settings
//! cargo run --bin querybase-server
//!
//! # Explicit config file and bind address
//! cargo run --bin querybase-server -- --config ./querybase.toml --host 0.0.0.0 --port 8080
//!
//! # Create the catalog and audit tables, then serve
//! cargo run --bin querybase-server -- --init-schema
//! ```

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use querybase::audit::{ExecutionAuditor, PgAuditStore};
use querybase::catalog::{init_schema, CatalogStore, PgCatalogStore, SnapshotCatalog, StaticCatalog};
use querybase::config::{CacheBackendKind, CatalogSource, LoggingConfig};
use querybase::datasource::PgDataSource;
use querybase::db::create_pool;
use querybase::execution::{
    CacheBackend, ExecutionCache, MemoryCacheBackend, QueryEngine, RedisCacheBackend,
};
use querybase::protocol::{rest, Handler};
use querybase::Config;

static TRACE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Environment variable overriding `logging.level`
const LOG_ENV: &str = "QUERYBASE_LOG";

#[derive(Debug, Parser)]
#[command(name = "querybase-server", version, about = "Catalog-driven SQL query server")]
struct Args {
    /// Configuration file (defaults to querybase.toml + querybase.local.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override server.host
    #[arg(long)]
    host: Option<String>,

    /// Override server.port
    #[arg(long)]
    port: Option<u16>,

    /// Create the catalog and audit tables before serving
    #[arg(long)]
    init_schema: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::load().context("loading configuration")?,
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "querybase_starting");

    let catalog_pool = create_pool("catalog", config.catalog_url(), config.catalog.pool_size)
        .context("creating catalog pool")?;
    if args.init_schema {
        init_schema(&catalog_pool).await.context("initializing schema")?;
        info!("schema_initialized");
    }

    let catalog = build_catalog(&config, catalog_pool.clone()).await?;
    let cache = build_cache(&config).await?;

    let datasource_pool = create_pool("datasource", &config.datasource.url, config.datasource.pool_size)
        .context("creating data source pool")?;
    let datasource = Arc::new(PgDataSource::new(datasource_pool));

    let (auditor, workers) = if config.audit.enabled {
        let store = Arc::new(PgAuditStore::new(catalog_pool));
        let (auditor, workers) = ExecutionAuditor::spawn(store, config.audit.settings());
        (auditor, Some(workers))
    } else {
        info!("audit_disabled");
        (ExecutionAuditor::disabled(), None)
    };

    let engine = QueryEngine::new(
        catalog,
        cache,
        datasource,
        auditor,
        config.query.default_timeout(),
    );
    let handler = Arc::new(Handler::new(engine));

    rest::start_http_server(Arc::clone(&handler), &config.server, rest::shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("http server failed")?;

    // Drop the last sender before draining so the workers see the queue close.
    let dropped = handler.engine().auditor().dropped();
    drop(handler);
    if let Some(workers) = workers {
        workers.shutdown(config.server.shutdown_timeout()).await;
    }
    if dropped > 0 {
        warn!(dropped, "audit_records_dropped");
    }

    info!("querybase_stopped");
    Ok(())
}

async fn build_catalog(
    config: &Config,
    pool: deadpool_postgres::Pool,
) -> anyhow::Result<Arc<dyn CatalogStore>> {
    let inner: Arc<dyn CatalogStore> = match config.catalog.source {
        CatalogSource::Postgres => Arc::new(PgCatalogStore::new(pool)),
        CatalogSource::File => {
            let path = config
                .catalog
                .file
                .as_ref()
                .context("catalog.file must be set when catalog.source = \"file\"")?;
            let catalog = StaticCatalog::from_file(path)
                .with_context(|| format!("loading catalog file {}", path.display()))?;
            info!(path = %path.display(), queries = catalog.len(), "catalog_file_loaded");
            Arc::new(catalog)
        }
    };

    let policy = config.catalog.refresh_policy();
    let snapshot = SnapshotCatalog::new(inner, policy)
        .await
        .context("loading query catalog")?;
    Ok(Arc::new(snapshot))
}

async fn build_cache(config: &Config) -> anyhow::Result<ExecutionCache> {
    let backend: Arc<dyn CacheBackend> = match config.cache.backend {
        CacheBackendKind::Redis => {
            let redis = RedisCacheBackend::connect(&config.cache.redis_url)
                .await
                .context("connecting to redis")?;
            if let Err(e) = redis.ping().await {
                warn!(error = %e, "redis_ping_failed");
            }
            Arc::new(redis)
        }
        CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(config.cache.max_entries)),
    };
    Ok(ExecutionCache::new(backend, config.cache.default_ttl()))
}

fn init_tracing(logging_config: &LoggingConfig) {
    // QUERYBASE_LOG takes precedence over logging.level
    let level = std::env::var(LOG_ENV)
        .ok()
        .unwrap_or_else(|| logging_config.level.clone());
    let json = logging_config.format == "json";

    let filter = tracing_subscriber::EnvFilter::try_new(&level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = match &logging_config.file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("ERROR: Unable to open log file '{}': {e}", path.display());
                    return;
                }
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = TRACE_GUARD.set(guard);

            let base = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_writer(non_blocking);
            if json {
                Box::new(base.json().finish())
            } else {
                Box::new(base.compact().finish())
            }
        }
        None => {
            let base = tracing_subscriber::fmt().with_env_filter(filter);
            if json {
                Box::new(base.json().finish())
            } else {
                Box::new(base.compact().finish())
            }
        }
    };

    let _ = tracing::subscriber::set_global_default(subscriber);
}
