//! Catalog snapshots with an explicit refresh policy.
//!
//! ## Design
//!
//! The active definitions are held in an `ArcSwap` so request handlers read
//! them without locking. Reloads build a complete new snapshot and swap it in;
//! a failed reload leaves the previous snapshot in place.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{CatalogError, CatalogResult, CatalogStore, QueryDefinition};

/// When the snapshot is (re)loaded from the backing store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// No snapshot; every lookup goes to the backing store
    OnDemand,
    /// Load once at construction, then only on explicit `refresh()`
    LoadOnce,
    /// Load at construction and reload in the background at this interval
    Periodic(Duration),
}

#[derive(Default)]
struct Snapshot {
    by_slug: HashMap<String, Arc<QueryDefinition>>,
    ordered: Vec<Arc<QueryDefinition>>,
}

impl Snapshot {
    async fn load(store: &dyn CatalogStore) -> CatalogResult<Self> {
        let ordered = store.list_active().await?;
        for definition in &ordered {
            for problem in definition.check() {
                warn!(slug = %definition.slug, problem = %problem, "catalog_definition_inconsistent");
            }
        }
        let by_slug = ordered
            .iter()
            .map(|d| (d.slug.clone(), Arc::clone(d)))
            .collect();
        Ok(Snapshot { by_slug, ordered })
    }
}

/// Caching wrapper over another [`CatalogStore`].
pub struct SnapshotCatalog {
    inner: Arc<dyn CatalogStore>,
    policy: RefreshPolicy,
    snapshot: Arc<ArcSwap<Snapshot>>,
    reloader: Option<JoinHandle<()>>,
}

impl SnapshotCatalog {
    /// Build the catalog and perform the initial load required by `policy`.
    ///
    /// Periodic reloading needs a running tokio runtime.
    pub async fn new(inner: Arc<dyn CatalogStore>, policy: RefreshPolicy) -> CatalogResult<Self> {
        let initial = match policy {
            RefreshPolicy::OnDemand => Snapshot::default(),
            RefreshPolicy::LoadOnce | RefreshPolicy::Periodic(_) => {
                Snapshot::load(inner.as_ref()).await?
            }
        };
        info!(policy = ?policy, queries = initial.ordered.len(), "catalog_loaded");

        let snapshot = Arc::new(ArcSwap::from_pointee(initial));
        let reloader = match policy {
            RefreshPolicy::Periodic(interval) => Some(tokio::spawn(reload_loop(
                Arc::clone(&inner),
                Arc::clone(&snapshot),
                interval,
            ))),
            _ => None,
        };

        Ok(SnapshotCatalog {
            inner,
            policy,
            snapshot,
            reloader,
        })
    }

    /// Reload now. Returns the number of active definitions.
    pub async fn refresh(&self) -> CatalogResult<usize> {
        let fresh = Snapshot::load(self.inner.as_ref()).await?;
        let count = fresh.ordered.len();
        self.snapshot.store(Arc::new(fresh));
        Ok(count)
    }
}

impl Drop for SnapshotCatalog {
    fn drop(&mut self) {
        if let Some(handle) = self.reloader.take() {
            handle.abort();
        }
    }
}

async fn reload_loop(
    inner: Arc<dyn CatalogStore>,
    snapshot: Arc<ArcSwap<Snapshot>>,
    interval: Duration,
) {
    let start = tokio::time::Instant::now() + interval;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        ticker.tick().await;
        match Snapshot::load(inner.as_ref()).await {
            Ok(fresh) => {
                debug!(queries = fresh.ordered.len(), "catalog_reloaded");
                snapshot.store(Arc::new(fresh));
            }
            Err(e) => warn!(error = %e, "catalog_reload_failed"),
        }
    }
}

#[async_trait]
impl CatalogStore for SnapshotCatalog {
    async fn find_by_slug(&self, slug: &str) -> CatalogResult<Arc<QueryDefinition>> {
        if self.policy == RefreshPolicy::OnDemand {
            return self.inner.find_by_slug(slug).await;
        }
        self.snapshot
            .load()
            .by_slug
            .get(slug)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                slug: slug.to_string(),
            })
    }

    async fn list_active(&self) -> CatalogResult<Vec<Arc<QueryDefinition>>> {
        if self.policy == RefreshPolicy::OnDemand {
            return self.inner.list_active().await;
        }
        Ok(self.snapshot.load().ordered.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::*;
    use crate::catalog::StaticCatalog;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose contents can be swapped and whose calls are counted.
    struct MutableStore {
        current: Mutex<StaticCatalog>,
        list_calls: AtomicUsize,
        find_calls: AtomicUsize,
        fail: Mutex<bool>,
    }

    impl MutableStore {
        fn new(slugs: &[&str]) -> Arc<Self> {
            Arc::new(MutableStore {
                current: Mutex::new(Self::catalog(slugs)),
                list_calls: AtomicUsize::new(0),
                find_calls: AtomicUsize::new(0),
                fail: Mutex::new(false),
            })
        }

        fn catalog(slugs: &[&str]) -> StaticCatalog {
            StaticCatalog::new(slugs.iter().map(|s| definition(s, vec![])))
        }

        fn replace(&self, slugs: &[&str]) {
            *self.current.lock() = Self::catalog(slugs);
        }
    }

    #[async_trait]
    impl CatalogStore for MutableStore {
        async fn find_by_slug(&self, slug: &str) -> CatalogResult<Arc<QueryDefinition>> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            let catalog = self.current.lock().clone();
            catalog.find_by_slug(slug).await
        }

        async fn list_active(&self) -> CatalogResult<Vec<Arc<QueryDefinition>>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock() {
                return Err(CatalogError::Backend("down".to_string()));
            }
            let catalog = self.current.lock().clone();
            catalog.list_active().await
        }
    }

    #[tokio::test]
    async fn test_on_demand_passes_through() {
        let store = MutableStore::new(&["a"]);
        let catalog = SnapshotCatalog::new(store.clone(), RefreshPolicy::OnDemand)
            .await
            .unwrap();

        assert_eq!(store.list_calls.load(Ordering::SeqCst), 0);
        catalog.find_by_slug("a").await.unwrap();
        catalog.find_by_slug("a").await.unwrap();
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 2);

        store.replace(&["b"]);
        assert!(catalog.find_by_slug("b").await.is_ok());
    }

    #[tokio::test]
    async fn test_load_once_serves_from_snapshot() {
        let store = MutableStore::new(&["a", "b"]);
        let catalog = SnapshotCatalog::new(store.clone(), RefreshPolicy::LoadOnce)
            .await
            .unwrap();

        catalog.find_by_slug("a").await.unwrap();
        catalog.find_by_slug("b").await.unwrap();
        assert_eq!(store.find_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.list_calls.load(Ordering::SeqCst), 1);

        // Stale until refreshed
        store.replace(&["c"]);
        assert!(catalog.find_by_slug("c").await.is_err());
        assert_eq!(catalog.refresh().await.unwrap(), 1);
        assert!(catalog.find_by_slug("c").await.is_ok());
        assert!(catalog.find_by_slug("a").await.is_err());
    }

    #[tokio::test]
    async fn test_initial_load_failure_is_returned() {
        let store = MutableStore::new(&["a"]);
        *store.fail.lock() = true;
        let result = SnapshotCatalog::new(store, RefreshPolicy::LoadOnce).await;
        assert!(matches!(result, Err(CatalogError::Backend(_))));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let store = MutableStore::new(&["a"]);
        let catalog = SnapshotCatalog::new(store.clone(), RefreshPolicy::LoadOnce)
            .await
            .unwrap();

        *store.fail.lock() = true;
        assert!(catalog.refresh().await.is_err());
        assert!(catalog.find_by_slug("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_periodic_reload_picks_up_changes() {
        let store = MutableStore::new(&["a"]);
        let catalog = SnapshotCatalog::new(
            store.clone(),
            RefreshPolicy::Periodic(Duration::from_millis(20)),
        )
        .await
        .unwrap();

        store.replace(&["a", "z"]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let slugs: Vec<String> = catalog
            .list_active()
            .await
            .unwrap()
            .iter()
            .map(|d| d.slug.clone())
            .collect();
        assert_eq!(slugs, vec!["a", "z"]);
        assert!(store.list_calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_drop_stops_reloader() {
        let store = MutableStore::new(&["a"]);
        let catalog = SnapshotCatalog::new(
            store.clone(),
            RefreshPolicy::Periodic(Duration::from_millis(10)),
        )
        .await
        .unwrap();
        drop(catalog);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls = store.list_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(store.list_calls.load(Ordering::SeqCst), calls);
    }
}
