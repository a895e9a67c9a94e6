//! Shared request state for the HTTP layer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::execution::QueryEngine;

/// Owns the query engine and process-level counters.
pub struct Handler {
    engine: QueryEngine,
    start_time: Instant,
    query_count: AtomicU64,
}

impl Handler {
    pub fn new(engine: QueryEngine) -> Self {
        Handler {
            engine,
            start_time: Instant::now(),
            query_count: AtomicU64::new(0),
        }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Get uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Count one dynamic query request
    pub fn increment_query_count(&self) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_queries(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use super::Handler;
    use crate::audit::ExecutionAuditor;
    use crate::catalog::{QueryDefinition, StaticCatalog};
    use crate::execution::testing::FakeDataSource;
    use crate::execution::{ExecutionCache, MemoryCacheBackend, QueryEngine};

    /// Handler over an in-memory catalog and cache.
    pub fn handler_with(
        definitions: Vec<QueryDefinition>,
        datasource: Arc<FakeDataSource>,
    ) -> Arc<Handler> {
        let cache = ExecutionCache::new(
            Arc::new(MemoryCacheBackend::new(128)),
            Duration::from_secs(60),
        );
        let engine = QueryEngine::new(
            Arc::new(StaticCatalog::new(definitions)),
            cache,
            datasource,
            ExecutionAuditor::disabled(),
            Duration::from_secs(30),
        );
        Arc::new(Handler::new(engine))
    }
}
