//! Query Timeout Module
//!
//! Bounds the cache-and-execute phase of a request by the query's deadline.
//!
//! ## Design
//!
//! The guard wraps the whole `get_or_set` future in `tokio::time::timeout`.
//! When the deadline fires the inner future is dropped, which releases the
//! single-flight slot and cancels any in-flight statement on the data source.

use std::future::Future;
use std::time::{Duration, Instant};

use super::ExecutionError;
use crate::catalog::QueryDefinition;

/// Timeout error
#[derive(Debug, Clone, thiserror::Error)]
#[error("query exceeded timeout of {timeout:?} (ran for {elapsed:?})")]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub timeout: Duration,
    /// How long the query actually ran
    pub elapsed: Duration,
}

/// Per-request deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutGuard {
    start_time: Instant,
    timeout: Duration,
}

impl TimeoutGuard {
    /// Start a guard with the given budget
    pub fn new(timeout: Duration) -> Self {
        TimeoutGuard {
            start_time: Instant::now(),
            timeout,
        }
    }

    /// Use the definition's `timeout_seconds`; zero falls back to `default`.
    pub fn for_definition(definition: &QueryDefinition, default: Duration) -> Self {
        let timeout = match definition.timeout_seconds {
            0 => default,
            secs => Duration::from_secs(secs),
        };
        TimeoutGuard::new(timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Get the elapsed time since the guard started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Get the remaining time before the deadline
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start_time.elapsed())
    }

    /// Drive `fut` to completion or fail with [`ExecutionError::DeadlineExceeded`].
    pub async fn run<T, Fut>(&self, fut: Fut) -> Result<T, ExecutionError>
    where
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        match tokio::time::timeout(self.remaining(), fut).await {
            Ok(result) => result,
            Err(_) => Err(TimeoutError {
                timeout: self.timeout,
                elapsed: self.elapsed(),
            }
            .into()),
        }
    }
}
