//! Analytical data sources
//!
//! A [`DataSource`] runs a catalog SQL template with positional arguments and
//! returns the result set as ordered column → value records.

mod postgres;

pub use postgres::PgDataSource;

use async_trait::async_trait;

use crate::execution::ExecutionError;
use crate::value::{ParamValue, Record};

/// Executes parameterized SQL against the analytical store.
///
/// Implementations must stop work when the returned future is dropped; the
/// timeout guard relies on this to abort long statements.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run `sql` with `args[i]` bound to placeholder `$i+1` (`None` binds NULL).
    async fn run(&self, sql: &str, args: &[Option<ParamValue>]) -> Result<Vec<Record>, ExecutionError>;
}
