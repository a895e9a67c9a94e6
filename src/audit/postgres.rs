//! Postgres audit store writing into `query_executions`.

use async_trait::async_trait;
use deadpool_postgres::Pool;

use super::{AuditError, AuditStore, ExecutionRecord};

const INSERT_EXECUTION: &str = "INSERT INTO query_executions \
     (query_id, query_slug, duration_ms, cache_hit, row_count, parameters, error, client_ip, user_agent, executed_at) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";

fn backend(e: impl std::fmt::Display) -> AuditError {
    AuditError::Backend(e.to_string())
}

#[derive(Clone)]
pub struct PgAuditStore {
    pool: Pool,
}

impl PgAuditStore {
    pub fn new(pool: Pool) -> Self {
        PgAuditStore { pool }
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn append(&self, record: &ExecutionRecord) -> Result<(), AuditError> {
        let client = self.pool.get().await.map_err(backend)?;
        let statement = client.prepare_cached(INSERT_EXECUTION).await.map_err(backend)?;

        let duration_ms = i64::try_from(record.duration_ms).unwrap_or(i64::MAX);
        let row_count = i64::try_from(record.row_count).unwrap_or(i64::MAX);
        client
            .execute(
                &statement,
                &[
                    &record.query_id,
                    &record.query_slug,
                    &duration_ms,
                    &record.cache_hit,
                    &row_count,
                    &record.parameters,
                    &record.error,
                    &record.client_ip,
                    &record.user_agent,
                    &record.executed_at,
                ],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }
}
