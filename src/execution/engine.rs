//! Query Engine
//!
//! Ties the pipeline together for one request: catalog lookup, parameter
//! resolution, cache-aside execution under the query deadline, and the
//! detached audit record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{
    bind_arguments, build_cache_key, resolve_parameters, ExecutionCache, ExecutionError,
    ResolvedParams, TimeoutGuard, ValidationErrors,
};
use crate::audit::{ExecutionAuditor, ExecutionRecord};
use crate::catalog::{CatalogError, CatalogStore, QueryDefinition};
use crate::datasource::DataSource;
use crate::value::Record;

/// Caller details carried into the audit record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// A successful execution
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub definition: Arc<QueryDefinition>,
    pub records: Vec<Record>,
    pub cache_hit: bool,
    pub parameters: ResolvedParams,
    pub duration: Duration,
}

/// Request-level failure, one variant per HTTP outcome
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unknown or inactive slug
    #[error("query not found: {slug}")]
    NotFound { slug: String, details: String },

    /// One or more parameters failed to resolve
    #[error("invalid parameters for {slug}: {errors}")]
    Validation {
        slug: String,
        errors: ValidationErrors,
    },

    /// Cache, data source or deadline failure
    #[error("execution of {slug} failed: {source}")]
    Execution {
        slug: String,
        #[source]
        source: ExecutionError,
        duration: Duration,
    },

    /// The catalog backend could not be read
    #[error("catalog unavailable: {source}")]
    Catalog {
        slug: Option<String>,
        #[source]
        source: CatalogError,
    },
}

/// Executes catalog queries by slug.
pub struct QueryEngine {
    catalog: Arc<dyn CatalogStore>,
    cache: ExecutionCache,
    datasource: Arc<dyn DataSource>,
    auditor: ExecutionAuditor,
    default_timeout: Duration,
}

impl QueryEngine {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        cache: ExecutionCache,
        datasource: Arc<dyn DataSource>,
        auditor: ExecutionAuditor,
        default_timeout: Duration,
    ) -> Self {
        QueryEngine {
            catalog,
            cache,
            datasource,
            auditor,
            default_timeout,
        }
    }

    pub fn auditor(&self) -> &ExecutionAuditor {
        &self.auditor
    }

    /// Active definitions, ordered by slug
    pub async fn list_active(&self) -> Result<Vec<Arc<QueryDefinition>>, EngineError> {
        self.catalog
            .list_active()
            .await
            .map_err(|source| EngineError::Catalog { slug: None, source })
    }

    /// Run the query registered under `slug` with raw query-string values.
    pub async fn execute(
        &self,
        slug: &str,
        raw: &HashMap<String, String>,
        client: ClientInfo,
    ) -> Result<QueryOutcome, EngineError> {
        let start = Instant::now();

        let definition = self.catalog.find_by_slug(slug).await.map_err(|e| match e {
            CatalogError::NotFound { .. } => EngineError::NotFound {
                slug: slug.to_string(),
                details: e.to_string(),
            },
            source => EngineError::Catalog {
                slug: Some(slug.to_string()),
                source,
            },
        })?;

        let parameters = resolve_parameters(&definition, raw).map_err(|errors| {
            debug!(slug, invalid = errors.len(), "parameter_validation_failed");
            EngineError::Validation {
                slug: slug.to_string(),
                errors,
            }
        })?;

        let cache_key = build_cache_key(&definition.slug, &parameters, &definition.parameters);
        let args = bind_arguments(&parameters, &definition.parameters);
        let ttl = Duration::from_secs(definition.cache_ttl);
        let guard = TimeoutGuard::for_definition(&definition, self.default_timeout);

        let datasource = &self.datasource;
        let sql = definition.sql_template.as_str();
        let result = guard
            .run(self.cache.get_or_set::<Vec<Record>, _, _>(&cache_key, ttl, || async move {
                datasource.run(sql, &args).await
            }))
            .await;
        let duration = start.elapsed();

        self.audit(&definition, &parameters, duration, &result, client);

        match result {
            Ok((records, cache_hit)) => {
                info!(
                    slug,
                    cache_key = %cache_key,
                    cache_hit,
                    rows = records.len(),
                    duration_ms = duration.as_millis() as u64,
                    "query_executed"
                );
                Ok(QueryOutcome {
                    definition,
                    records,
                    cache_hit,
                    parameters,
                    duration,
                })
            }
            Err(source) => {
                warn!(
                    slug,
                    cache_key = %cache_key,
                    error = %source,
                    duration_ms = duration.as_millis() as u64,
                    "query_failed"
                );
                Err(EngineError::Execution {
                    slug: slug.to_string(),
                    source,
                    duration,
                })
            }
        }
    }

    fn audit(
        &self,
        definition: &QueryDefinition,
        parameters: &ResolvedParams,
        duration: Duration,
        result: &Result<(Vec<Record>, bool), ExecutionError>,
        client: ClientInfo,
    ) {
        if !self.auditor.is_enabled() {
            return;
        }
        let (cache_hit, row_count, error) = match result {
            Ok((records, hit)) => (*hit, records.len(), None),
            Err(e) => (false, 0, Some(e.to_string())),
        };
        let parameters = serde_json::to_value(parameters)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));

        self.auditor.record(ExecutionRecord {
            query_id: (definition.id > 0).then_some(definition.id),
            query_slug: definition.slug.clone(),
            duration_ms: duration.as_millis() as u64,
            cache_hit,
            row_count,
            parameters,
            error,
            client_ip: client.ip,
            user_agent: client.user_agent,
            executed_at: Utc::now(),
        });
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeDataSource;
    use super::*;
    use crate::audit::testing::RecordingStore;
    use crate::audit::{AuditSettings, ExecutionAuditor};
    use crate::catalog::fixtures::{definition, param};
    use crate::catalog::StaticCatalog;
    use crate::execution::MemoryCacheBackend;
    use crate::value::ParamValue;
    use serde_json::json;

    fn employees_catalog() -> StaticCatalog {
        let mut def = definition(
            "employees-by-department",
            vec![param("department", "integer", 1, true)],
        );
        def.sql_template =
            "SELECT employee_id, department_id FROM employees WHERE department_id = $1".to_string();
        def.cache_ttl = 300;
        def.timeout_seconds = 1;
        StaticCatalog::new([def])
    }

    fn engine(datasource: Arc<FakeDataSource>, auditor: ExecutionAuditor) -> QueryEngine {
        QueryEngine::new(
            Arc::new(employees_catalog()),
            ExecutionCache::new(
                Arc::new(MemoryCacheBackend::new(100)),
                Duration::from_secs(60),
            ),
            datasource,
            auditor,
            Duration::from_secs(30),
        )
    }

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn department_rows() -> Arc<FakeDataSource> {
        Arc::new(FakeDataSource::with_rows(vec![
            json!({ "employee_id": 1, "department_id": 10 }),
            json!({ "employee_id": 2, "department_id": 10 }),
        ]))
    }

    #[tokio::test]
    async fn test_execute_binds_and_returns_rows() {
        let source = department_rows();
        let engine = engine(source.clone(), ExecutionAuditor::disabled());

        let outcome = engine
            .execute(
                "employees-by-department",
                &raw(&[("department", "10")]),
                ClientInfo::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 2);
        assert!(outcome
            .records
            .iter()
            .all(|r| r["department_id"] == json!(10)));
        assert!(!outcome.cache_hit);
        assert_eq!(outcome.parameters["department"], ParamValue::Integer(10));
        assert_eq!(*source.last_args.lock(), vec![Some(ParamValue::Integer(10))]);
    }

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let source = department_rows();
        let engine = engine(source.clone(), ExecutionAuditor::disabled());
        let params = raw(&[("department", "10")]);

        let first = engine
            .execute("employees-by-department", &params, ClientInfo::default())
            .await
            .unwrap();
        let second = engine
            .execute("employees-by-department", &params, ClientInfo::default())
            .await
            .unwrap();

        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.records, second.records);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_query_string_keys_share_cache() {
        let source = department_rows();
        let engine = engine(source.clone(), ExecutionAuditor::disabled());

        engine
            .execute(
                "employees-by-department",
                &raw(&[("department", "10"), ("utm", "a")]),
                ClientInfo::default(),
            )
            .await
            .unwrap();
        let second = engine
            .execute(
                "employees-by-department",
                &raw(&[("utm", "b"), ("department", "10")]),
                ClientInfo::default(),
            )
            .await
            .unwrap();
        assert!(second.cache_hit);
    }

    #[tokio::test]
    async fn test_unknown_slug_is_not_found() {
        let engine = engine(department_rows(), ExecutionAuditor::disabled());
        let err = engine
            .execute("does-not-exist", &raw(&[]), ClientInfo::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { ref slug, .. } if slug == "does-not-exist"));
    }

    #[tokio::test]
    async fn test_validation_failure_skips_execution() {
        let source = department_rows();
        let engine = engine(source.clone(), ExecutionAuditor::disabled());
        let err = engine
            .execute(
                "employees-by-department",
                &raw(&[("department", "abc")]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();

        match err {
            EngineError::Validation { errors, .. } => assert!(errors.contains("department")),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_not_cached() {
        let slow = Arc::new(FakeDataSource {
            delay: Some(Duration::from_secs(3)),
            ..Default::default()
        });
        let engine = engine(slow.clone(), ExecutionAuditor::disabled());
        let params = raw(&[("department", "10")]);

        let err = engine
            .execute("employees-by-department", &params, ClientInfo::default())
            .await
            .unwrap_err();
        match err {
            EngineError::Execution { source, duration, .. } => {
                assert!(source.is_deadline_exceeded());
                assert!(duration >= Duration::from_secs(1));
            }
            other => panic!("expected execution error, got {other:?}"),
        }

        // Nothing was stored; the next call runs the data source again
        let _ = engine
            .execute("employees-by-department", &params, ClientInfo::default())
            .await;
        assert_eq!(slow.calls(), 2);
    }

    #[tokio::test]
    async fn test_datasource_error_is_execution_error() {
        let failing = Arc::new(FakeDataSource {
            fail: Some("relation \"employees\" does not exist".to_string()),
            ..Default::default()
        });
        let engine = engine(failing, ExecutionAuditor::disabled());
        let err = engine
            .execute(
                "employees-by-department",
                &raw(&[("department", "10")]),
                ClientInfo::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Execution {
                source: ExecutionError::DataSource(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_audit_records_execution_outcomes_only() {
        let store = Arc::new(RecordingStore::default());
        let (auditor, workers) = ExecutionAuditor::spawn(store.clone(), AuditSettings::default());
        let engine = engine(department_rows(), auditor);
        let client = ClientInfo {
            ip: Some("10.1.2.3".to_string()),
            user_agent: Some("curl/8.0".to_string()),
        };

        engine
            .execute(
                "employees-by-department",
                &raw(&[("department", "10")]),
                client.clone(),
            )
            .await
            .unwrap();
        let _ = engine
            .execute("does-not-exist", &raw(&[]), client.clone())
            .await;
        let _ = engine
            .execute("employees-by-department", &raw(&[]), client)
            .await;

        drop(engine);
        assert!(workers.shutdown(Duration::from_secs(5)).await);

        let records = store.records.lock();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.query_slug, "employees-by-department");
        assert_eq!(record.row_count, 2);
        assert!(!record.cache_hit);
        assert_eq!(record.parameters, json!({ "department": 10 }));
        assert_eq!(record.client_ip.as_deref(), Some("10.1.2.3"));
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_list_active() {
        let engine = engine(department_rows(), ExecutionAuditor::disabled());
        let queries = engine.list_active().await.unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].slug, "employees-by-department");
    }
}
