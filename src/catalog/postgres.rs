//! Postgres-backed catalog store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::Row;
use tracing::debug;

use super::{CatalogError, CatalogResult, CatalogStore, ParameterDefinition, QueryDefinition};
use crate::value::ParamType;

/// DDL for the catalog and audit tables
pub const SCHEMA_SQL: &str = include_str!("../../migrations/001_querybase.sql");

const SELECT_QUERY_COLUMNS: &str =
    "SELECT id, slug, name, description, sql_query, cache_ttl, timeout_seconds, active FROM queries";

/// Create the catalog and audit tables if they are missing.
pub async fn init_schema(pool: &Pool) -> CatalogResult<()> {
    let client = pool.get().await.map_err(backend)?;
    client.batch_execute(SCHEMA_SQL).await.map_err(backend)?;
    Ok(())
}

fn backend(e: impl std::fmt::Display) -> CatalogError {
    CatalogError::Backend(e.to_string())
}

/// Reads `queries` and `query_parameters`.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: Pool,
}

impl PgCatalogStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn definition_from_row(row: &Row) -> Result<QueryDefinition, tokio_postgres::Error> {
        let cache_ttl: i32 = row.try_get("cache_ttl")?;
        let timeout_seconds: i32 = row.try_get("timeout_seconds")?;
        Ok(QueryDefinition {
            id: row.try_get("id")?,
            slug: row.try_get("slug")?,
            name: row.try_get("name")?,
            description: row
                .try_get::<_, Option<String>>("description")?
                .unwrap_or_default(),
            sql_template: row.try_get("sql_query")?,
            parameters: Vec::new(),
            cache_ttl: cache_ttl.max(0) as u64,
            timeout_seconds: timeout_seconds.max(0) as u64,
            active: row.try_get("active")?,
        })
    }

    fn parameter_from_row(row: &Row) -> Result<(i64, ParameterDefinition), tokio_postgres::Error> {
        let query_id: i64 = row.try_get("query_id")?;
        let position: i32 = row.try_get("position")?;
        let param_type: String = row.try_get("param_type")?;
        Ok((
            query_id,
            ParameterDefinition {
                name: row.try_get("name")?,
                param_type: ParamType::parse(&param_type),
                position: position.max(0) as usize,
                required: row.try_get("is_required")?,
                default_value: row.try_get("default_value")?,
            },
        ))
    }

    /// Parameters for the given query ids, grouped by id, in position order.
    async fn load_parameters(
        &self,
        client: &deadpool_postgres::Object,
        ids: &[i64],
    ) -> CatalogResult<HashMap<i64, Vec<ParameterDefinition>>> {
        let rows = client
            .query(
                "SELECT query_id, name, param_type, position, is_required, default_value \
                 FROM query_parameters WHERE query_id = ANY($1) ORDER BY query_id, position, id",
                &[&ids],
            )
            .await
            .map_err(backend)?;

        let mut grouped: HashMap<i64, Vec<ParameterDefinition>> = HashMap::new();
        for row in &rows {
            let (query_id, param) = Self::parameter_from_row(row).map_err(backend)?;
            grouped.entry(query_id).or_default().push(param);
        }
        Ok(grouped)
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn find_by_slug(&self, slug: &str) -> CatalogResult<Arc<QueryDefinition>> {
        let client = self.pool.get().await.map_err(backend)?;
        let row = client
            .query_opt(
                &format!("{SELECT_QUERY_COLUMNS} WHERE slug = $1 AND active = TRUE"),
                &[&slug],
            )
            .await
            .map_err(backend)?
            .ok_or_else(|| CatalogError::NotFound {
                slug: slug.to_string(),
            })?;

        let mut definition = Self::definition_from_row(&row).map_err(backend)?;
        let mut params = self.load_parameters(&client, &[definition.id]).await?;
        definition.parameters = params.remove(&definition.id).unwrap_or_default();

        debug!(slug, parameters = definition.parameters.len(), "catalog_lookup");
        Ok(Arc::new(definition))
    }

    async fn list_active(&self) -> CatalogResult<Vec<Arc<QueryDefinition>>> {
        let client = self.pool.get().await.map_err(backend)?;
        let rows = client
            .query(
                &format!("{SELECT_QUERY_COLUMNS} WHERE active = TRUE ORDER BY slug"),
                &[],
            )
            .await
            .map_err(backend)?;

        let mut definitions = rows
            .iter()
            .map(Self::definition_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        let ids: Vec<i64> = definitions.iter().map(|d| d.id).collect();
        let mut params = self.load_parameters(&client, &ids).await?;
        for definition in &mut definitions {
            definition.parameters = params.remove(&definition.id).unwrap_or_default();
        }

        Ok(definitions.into_iter().map(Arc::new).collect())
    }
}
