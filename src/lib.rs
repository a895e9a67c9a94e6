//! # QueryBase
//!
//! Serves a catalog of named, parameterized SQL queries over HTTP. Each
//! catalog entry (a slug) carries a SQL template with positional
//! placeholders, typed parameter definitions, a cache TTL and a timeout.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! GET /api/query/:slug?name=value…
//!     ↓
//! [Catalog]          → QueryDefinition (active entries only)
//!     ↓
//! [Coercion]         → ParamValue per parameter, or a map of errors (400)
//!     ↓
//! [Binding]          → cache key + positional arguments
//!     ↓
//! [Cache-aside]      → hit, or single-flight DataSource run under the deadline
//!     ↓
//! Records + meta     (+ detached audit record)
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `catalog` | Query definitions and their stores |
//! | `execution` | Coercion, binding, cache, timeout, engine |
//! | `datasource` | Runs SQL templates against the analytical database |
//! | `audit` | Fire-and-forget execution records |
//! | `protocol` | HTTP routes, DTOs and server lifecycle |
//! | `config` | Layered TOML + environment configuration |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use querybase::{QueryEngine, StaticCatalog};
//!
//! let catalog = Arc::new(StaticCatalog::from_file("catalog.toml")?);
//! let engine = QueryEngine::new(catalog, cache, datasource, auditor, timeout);
//! let outcome = engine.execute("employees-by-department", &params, client).await?;
//! println!("{} rows, cache hit: {}", outcome.records.len(), outcome.cache_hit);
//! ```

pub mod audit;
pub mod catalog;
pub mod config;
pub mod datasource;
pub mod db;
pub mod execution;
pub mod protocol;
pub mod value;

pub use catalog::{CatalogError, CatalogStore, ParameterDefinition, QueryDefinition, StaticCatalog};
pub use config::Config;
pub use execution::{
    ClientInfo, EngineError, ExecutionCache, ExecutionError, QueryEngine, QueryOutcome,
};
pub use value::{ParamType, ParamValue, Record};
