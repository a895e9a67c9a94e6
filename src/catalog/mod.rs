//! Query Catalog
//!
//! The catalog is the externally maintained collection of [`QueryDefinition`]
//! entries the engine executes. Handlers only read from it.
//!
//! ## Stores
//!
//! | Store | Backing | Use |
//! |-------|---------|-----|
//! | [`PgCatalogStore`] | `queries` / `query_parameters` tables | production |
//! | [`StaticCatalog`] | in-memory, optionally loaded from TOML | local runs, tests |
//! | [`SnapshotCatalog`] | wraps another store | refresh policy |

mod memory;
mod postgres;
mod snapshot;

pub use memory::StaticCatalog;
pub use postgres::{init_schema, PgCatalogStore, SCHEMA_SQL};
pub use snapshot::{RefreshPolicy, SnapshotCatalog};

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::value::ParamType;

/// Catalog errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CatalogError {
    /// No active definition with this slug
    #[error("query not found: {slug}")]
    NotFound { slug: String },

    /// Backing store failure
    #[error("catalog backend error: {0}")]
    Backend(String),

    /// Catalog file could not be read or parsed
    #[error("catalog load error: {0}")]
    Load(String),
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// One parameter of a catalog query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParamType,

    /// 1-based placeholder index
    pub position: usize,

    #[serde(default)]
    pub required: bool,

    /// Raw default, coerced exactly like request input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

/// A named, parameterized SQL query exposed at `/api/query/<slug>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    #[serde(default)]
    pub id: i64,

    pub slug: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// SQL with positional placeholders (`$1`, `$2`, ...)
    #[serde(alias = "sql")]
    pub sql_template: String,

    /// Ordered parameter definitions
    #[serde(default)]
    pub parameters: Vec<ParameterDefinition>,

    /// Result cache TTL in seconds (0 = cache default)
    #[serde(default)]
    pub cache_ttl: u64,

    /// Execution timeout in seconds (0 = engine default)
    #[serde(default)]
    pub timeout_seconds: u64,

    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl QueryDefinition {
    /// Length of the positional argument vector: the highest declared position.
    pub fn max_position(&self) -> usize {
        self.parameters.iter().map(|p| p.position).max().unwrap_or(0)
    }

    /// Highest `$n` placeholder referenced by the SQL template.
    pub fn placeholder_count(&self) -> usize {
        placeholder_count(&self.sql_template)
    }

    /// Catalog consistency problems, if any. Only counts placeholders; the SQL
    /// itself is never parsed.
    pub fn check(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for p in &self.parameters {
            if p.position == 0 {
                problems.push(format!("parameter '{}' has position 0", p.name));
            }
        }

        let placeholders = self.placeholder_count();
        let positions = self.max_position();
        if placeholders != positions {
            problems.push(format!(
                "sql references {placeholders} placeholder(s) but parameters declare {positions}"
            ));
        }

        problems
    }
}

/// Highest `$n` placeholder index in `sql` (0 when none).
pub fn placeholder_count(sql: &str) -> usize {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\$(\d+)").expect("valid placeholder regex"));

    re.captures_iter(sql)
        .filter_map(|c| c.get(1)?.as_str().parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

/// Read access to the query catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Find an active definition by slug
    async fn find_by_slug(&self, slug: &str) -> CatalogResult<Arc<QueryDefinition>>;

    /// All active definitions, ordered by slug
    async fn list_active(&self) -> CatalogResult<Vec<Arc<QueryDefinition>>>;
}
