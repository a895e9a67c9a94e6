//! Postgres connection pools
//!
//! The catalog, the audit store and the analytical data source each get their
//! own deadpool pool so a slow analytical query cannot starve catalog lookups.

use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Pool construction error
#[derive(Debug, thiserror::Error)]
#[error("failed to create Postgres pool for {target}: {message}")]
pub struct PoolError {
    pub target: String,
    pub message: String,
}

/// Create a pool from a `postgres://` URL.
///
/// Connections are opened lazily; a bad URL fails here, an unreachable server
/// fails on first use.
pub fn create_pool(target: &str, url: &str, max_size: usize) -> Result<Pool, PoolError> {
    let mut cfg = Config::new();
    cfg.url = Some(url.to_string());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_size.max(1)));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| PoolError {
            target: target.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_is_lazy() {
        // Nothing listens here; construction must still succeed.
        let pool = create_pool("catalog", "postgres://user:pw@127.0.0.1:1/db", 4).unwrap();
        assert_eq!(pool.status().max_size, 4);
    }

    #[tokio::test]
    async fn test_zero_pool_size_is_clamped() {
        let pool = create_pool("audit", "postgres://user:pw@127.0.0.1:1/db", 0).unwrap();
        assert_eq!(pool.status().max_size, 1);
    }

    #[test]
    fn test_invalid_url_names_target() {
        let err = create_pool("datasource", "postgres://user@host:notaport/db", 4).unwrap_err();
        assert_eq!(err.target, "datasource");
        assert!(err.to_string().contains("datasource"));
    }
}
