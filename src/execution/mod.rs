//! Query Execution Module
//!
//! The dynamic query pipeline:
//!
//! ```text
//! slug
//!   ↓
//! [CatalogStore]        → QueryDefinition
//!   ↓
//! [coerce]              → resolved parameters | collected validation errors
//!   ↓
//! [binding]             → cache key + positional argument vector
//!   ↓
//! [TimeoutGuard]
//!   └─ [ExecutionCache] → hit, or DataSource::run on miss
//!   ↓
//! response  (+ ExecutionAuditor, detached)
//! ```

mod binding;
mod cache;
mod coerce;
mod engine;
mod redis;
mod timeout;

pub use binding::{bind_arguments, build_cache_key};
pub use cache::{CacheBackend, CacheEntry, CacheError, CacheStats, ExecutionCache, MemoryCacheBackend};
pub use coerce::{coerce_value, resolve_parameters, ResolvedParams, ValidationErrors};
pub use engine::{ClientInfo, EngineError, QueryEngine, QueryOutcome};
pub use redis::RedisCacheBackend;
pub use timeout::{TimeoutError, TimeoutGuard};

#[cfg(test)]
pub(crate) use engine::testing;

/// Execution error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    /// The per-query deadline elapsed
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(#[from] TimeoutError),

    /// Connectivity or query failure in the data source
    #[error("data source error: {0}")]
    DataSource(String),

    /// Cache backend failure
    #[error("cache error: {0}")]
    Cache(String),

    /// Result could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ExecutionError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ExecutionError::DeadlineExceeded(_))
    }
}

impl From<CacheError> for ExecutionError {
    fn from(e: CacheError) -> Self {
        ExecutionError::Cache(e.to_string())
    }
}
