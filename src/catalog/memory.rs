//! In-memory catalog, optionally loaded from a TOML file.
//!
//! ```toml
//! [[queries]]
//! slug = "employees-by-department"
//! name = "Employees by department"
//! sql = "SELECT employee_id, first_name FROM employees WHERE department_id = $1"
//! cache_ttl = 300
//!
//! [[queries.parameters]]
//! name = "department"
//! type = "integer"
//! position = 1
//! required = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{CatalogError, CatalogResult, CatalogStore, QueryDefinition};

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    queries: Vec<QueryDefinition>,
}

/// Fixed set of definitions held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    /// slug → definition; BTreeMap keeps `list_active` ordered by slug
    queries: BTreeMap<String, Arc<QueryDefinition>>,
}

impl StaticCatalog {
    pub fn new(definitions: impl IntoIterator<Item = QueryDefinition>) -> Self {
        let queries = definitions
            .into_iter()
            .map(|d| (d.slug.clone(), Arc::new(d)))
            .collect();
        StaticCatalog { queries }
    }

    /// Parse a TOML catalog document
    pub fn from_toml_str(source: &str) -> CatalogResult<Self> {
        let file: CatalogFile =
            toml::from_str(source).map_err(|e| CatalogError::Load(e.to_string()))?;
        Ok(Self::new(file.queries))
    }

    /// Load a TOML catalog file
    pub fn from_file(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Number of definitions, active or not
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

#[async_trait]
impl CatalogStore for StaticCatalog {
    async fn find_by_slug(&self, slug: &str) -> CatalogResult<Arc<QueryDefinition>> {
        self.queries
            .get(slug)
            .filter(|d| d.active)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                slug: slug.to_string(),
            })
    }

    async fn list_active(&self) -> CatalogResult<Vec<Arc<QueryDefinition>>> {
        Ok(self.queries.values().filter(|d| d.active).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::*;
    use crate::value::ParamType;

    const CATALOG: &str = r#"
        [[queries]]
        id = 2
        slug = "employees-by-department"
        name = "Employees by department"
        sql = "SELECT * FROM employees WHERE department_id = $1"
        cache_ttl = 300
        timeout_seconds = 10

        [[queries.parameters]]
        name = "department"
        type = "integer"
        position = 1
        required = true

        [[queries]]
        id = 1
        slug = "employees-all"
        name = "All employees"
        sql = "SELECT * FROM employees"

        [[queries]]
        id = 3
        slug = "retired"
        name = "Retired query"
        sql = "SELECT 1"
        active = false
    "#;

    #[tokio::test]
    async fn test_from_toml_str() {
        let catalog = StaticCatalog::from_toml_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);

        let def = catalog.find_by_slug("employees-by-department").await.unwrap();
        assert_eq!(def.id, 2);
        assert_eq!(def.cache_ttl, 300);
        assert_eq!(def.parameters[0].param_type, ParamType::Integer);
        assert!(def.parameters[0].required);
    }

    #[tokio::test]
    async fn test_inactive_is_not_found() {
        let catalog = StaticCatalog::from_toml_str(CATALOG).unwrap();
        let err = catalog.find_by_slug("retired").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { slug } if slug == "retired"));
    }

    #[tokio::test]
    async fn test_list_active_ordered_by_slug() {
        let catalog = StaticCatalog::from_toml_str(CATALOG).unwrap();
        let slugs: Vec<String> = catalog
            .list_active()
            .await
            .unwrap()
            .iter()
            .map(|d| d.slug.clone())
            .collect();
        assert_eq!(slugs, vec!["employees-all", "employees-by-department"]);
    }

    #[test]
    fn test_invalid_toml_is_load_error() {
        let err = StaticCatalog::from_toml_str("[[queries]]\nslug = 1").unwrap_err();
        assert!(matches!(err, CatalogError::Load(_)));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = StaticCatalog::from_file("/nonexistent/catalog.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.toml"));
    }

    #[tokio::test]
    async fn test_new_from_definitions() {
        let catalog = StaticCatalog::new(vec![definition("a", vec![])]);
        assert!(!catalog.is_empty());
        assert!(catalog.find_by_slug("a").await.is_ok());
        assert!(catalog.find_by_slug("b").await.is_err());
    }
}
