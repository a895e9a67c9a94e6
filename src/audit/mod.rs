//! Execution Audit Module
//!
//! ## Design
//!
//! Requests hand finished [`ExecutionRecord`]s to an [`ExecutionAuditor`],
//! which pushes them onto a bounded channel without waiting. A fixed pool of
//! worker tasks drains the channel into an [`AuditStore`], each write under its
//! own deadline. Nothing here can slow down or fail a request: a full queue
//! drops the record and store failures are only logged.

mod postgres;

pub use postgres::PgAuditStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One audited execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    /// Catalog id; `None` when the definition has no persistent id
    pub query_id: Option<i64>,
    pub query_slug: String,
    pub duration_ms: u64,
    pub cache_hit: bool,
    pub row_count: usize,
    /// Resolved parameters as a JSON object
    pub parameters: serde_json::Value,
    pub error: Option<String>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Audit persistence error
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuditError {
    #[error("audit backend error: {0}")]
    Backend(String),

    #[error("audit write timed out after {0:?}")]
    Timeout(Duration),
}

/// Append-only sink for execution records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &ExecutionRecord) -> Result<(), AuditError>;
}

/// Queue and worker sizing
#[derive(Debug, Clone, Copy)]
pub struct AuditSettings {
    pub queue_capacity: usize,
    pub workers: usize,
    pub write_timeout: Duration,
}

impl Default for AuditSettings {
    fn default() -> Self {
        AuditSettings {
            queue_capacity: 1024,
            workers: 2,
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// Non-blocking handle for submitting records. Cheap to clone.
#[derive(Clone)]
pub struct ExecutionAuditor {
    tx: Option<mpsc::Sender<ExecutionRecord>>,
    dropped: Arc<AtomicU64>,
}

impl ExecutionAuditor {
    /// Start `settings.workers` tasks writing into `store`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn AuditStore>, settings: AuditSettings) -> (Self, AuditWorkers) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..settings.workers.max(1))
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&rx),
                    Arc::clone(&store),
                    settings.write_timeout,
                ))
            })
            .collect();

        info!(
            workers = settings.workers.max(1),
            queue_capacity = settings.queue_capacity.max(1),
            "audit_workers_started"
        );

        (
            ExecutionAuditor {
                tx: Some(tx),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            AuditWorkers { handles },
        )
    }

    /// An auditor that discards everything
    pub fn disabled() -> Self {
        ExecutionAuditor {
            tx: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Enqueue without waiting.
    pub fn record(&self, record: ExecutionRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(record) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue_full",
                mpsc::error::TrySendError::Closed(_) => "workers_stopped",
            };
            warn!(reason, "audit_record_dropped");
        }
    }

    /// Records discarded because the queue was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handles of the running audit workers.
pub struct AuditWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl AuditWorkers {
    /// Wait for the workers to drain the queue and exit.
    ///
    /// Workers only exit once every [`ExecutionAuditor`] clone has been
    /// dropped. Returns `false` if `timeout` elapsed first; remaining workers
    /// are then aborted.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let handles = self.handles;
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(timeout, join_all).await.is_ok() {
            info!("audit_workers_drained");
            true
        } else {
            warn!(timeout = ?timeout, "audit_drain_timed_out");
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

async fn worker(
    id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ExecutionRecord>>>,
    store: Arc<dyn AuditStore>,
    write_timeout: Duration,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(record) = next else {
            break;
        };

        let outcome = match tokio::time::timeout(write_timeout, store.append(&record)).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(write_timeout)),
        };
        match outcome {
            Ok(()) => debug!(worker = id, slug = %record.query_slug, "audit_written"),
            Err(e) => warn!(
                worker = id,
                slug = %record.query_slug,
                error = %e,
                "audit_write_failed"
            ),
        }
    }
    debug!(worker = id, "audit_worker_stopped");
}
