//! Discovery: scan the worktrees directory, apply the result to the
//! registry, and start or stop per-worktree subsystems for the delta.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::registry::{Changes, Registry, WorktreeInfo, scan};
use crate::store::Store;
use crate::subsystems::WorktreeSubsystems;
use crate::task::spawn_logged;

/// Clears the scanning flag however the pass ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Keeps the registry, the store and the per-worktree subsystems in step with the worktrees directory.
pub struct DiscoveryService {
    worktrees_dir: PathBuf,
    registry: tokio::sync::Mutex<Registry>,
    store: Arc<Store>,
    subsystems: Arc<WorktreeSubsystems>,
    scanning: AtomicBool,
    completed: AtomicBool,
    periodic: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(
        main_repo: &Path,
        worktrees_dir: PathBuf,
        store: Arc<Store>,
        subsystems: Arc<WorktreeSubsystems>,
    ) -> Arc<Self> {
        Arc::new(Self {
            worktrees_dir,
            registry: tokio::sync::Mutex::new(Registry::new(main_repo)),
            store,
            subsystems,
            scanning: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            periodic: Mutex::new(None),
        })
    }

    /// The directory scanned for secondary worktrees.
    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    /// Whether a pass is running right now.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Whether at least one pass has finished.
    pub fn has_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// One scan-then-apply pass. Returns `None` if another pass is running.
    pub async fn run_once(&self) -> anyhow::Result<Option<Changes>> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Discovery already running, skipping");
            return Ok(None);
        }
        let _guard = ScanGuard(&self.scanning);
        let started = Instant::now();

        let root = self.worktrees_dir.clone();
        let found = tokio::task::spawn_blocking(move || scan(&root)).await?;

        let mut registry = self.registry.lock().await;
        let changes = registry.apply(found);
        self.store.worktrees.set(Arc::new(registry.index()));

        if !self.completed.swap(true, Ordering::SeqCst) {
            self.subsystems.start(registry.main());
        }
        for info in &changes.removed {
            self.subsystems.stop(&info.path).await;
        }
        for info in &changes.added {
            self.subsystems.start(info);
        }
        drop(registry);

        if changes.is_empty() {
            debug!(elapsed_ms = started.elapsed().as_millis(), "Discovery found no changes");
        } else {
            info!(
                added = changes.added.len(),
                removed = changes.removed.len(),
                elapsed_ms = started.elapsed().as_millis(),
                "Discovery applied changes"
            );
        }
        Ok(Some(changes))
    }

    /// Run discovery now if it has never completed.
    pub async fn ensure_discovered(&self) -> anyhow::Result<()> {
        if !self.has_completed() {
            self.run_once().await?;
        }
        Ok(())
    }

    /// Start a pass in the background.
    pub fn kick(self: &Arc<Self>) {
        let this = Arc::clone(self);
        spawn_logged("discovery-kick", async move {
            this.run_once().await.map(|_| ())
        });
    }

    /// Add a worktree created by the daemon itself.
    pub async fn register(&self, info: WorktreeInfo) -> bool {
        let mut registry = self.registry.lock().await;
        let added = registry.register(info.clone());
        if added {
            self.store.worktrees.set(Arc::new(registry.index()));
            self.subsystems.start(&info);
            info!(worktree = %info.name, "Registered worktree");
        }
        added
    }

    /// Forget the worktree at `path` and stop its subsystems.
    pub async fn unregister(&self, path: &Path) -> Option<WorktreeInfo> {
        let mut registry = self.registry.lock().await;
        let removed = registry.unregister(path)?;
        self.store.worktrees.set(Arc::new(registry.index()));
        self.subsystems.stop(path).await;
        info!(worktree = %removed.name, "Unregistered worktree");
        Some(removed)
    }

    /// Re-run discovery every `interval` until [`stop`](Self::stop).
    pub fn start(self: &Arc<Self>, interval: Duration) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = this.run_once().await {
                    tracing::warn!(error = %e, "Periodic discovery failed");
                }
            }
        });
        if let Ok(mut periodic) = self.periodic.lock() {
            *periodic = Some(handle);
        }
        info!(interval_ms = interval.as_millis(), "Periodic discovery started");
    }

    /// Cancel the periodic rescans.
    pub async fn stop(&self) {
        let handle = self.periodic.lock().ok().and_then(|mut p| p.take());
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("Periodic discovery stopped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn make_worktree(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join(".git"), "gitdir: /dev/null\n").unwrap();
        path.canonicalize().unwrap()
    }

    fn service(main: &Path, root: &Path) -> (Arc<DiscoveryService>, Arc<Store>, Arc<WorktreeSubsystems>) {
        let store = Arc::new(Store::new(Registry::new(main).index()));
        let subsystems = Arc::new(WorktreeSubsystems::new(None, Duration::from_millis(50)));
        let discovery = DiscoveryService::new(
            main,
            root.to_path_buf(),
            Arc::clone(&store),
            Arc::clone(&subsystems),
        );
        (discovery, store, subsystems)
    }

    #[tokio::test]
    async fn first_pass_starts_main_and_found_worktrees() {
        let main = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let a = make_worktree(root.path(), "a");
        std::fs::create_dir(root.path().join("not-a-worktree")).unwrap();
        let (discovery, store, subsystems) = service(main.path(), root.path());

        let changes = discovery.run_once().await.unwrap().unwrap();
        assert_eq!(changes.added.len(), 1);
        assert!(discovery.has_completed());
        assert!(!discovery.is_scanning());
        assert_eq!(store.index().len(), 2);
        assert!(store.index().get_by_path(&a).is_some());
        assert_eq!(subsystems.len(), 2);

        let again = discovery.run_once().await.unwrap().unwrap();
        assert!(again.is_empty());
        subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn removed_worktree_stops_its_subsystems() {
        let main = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let a = make_worktree(root.path(), "a");
        let (discovery, store, subsystems) = service(main.path(), root.path());
        discovery.run_once().await.unwrap();
        assert!(subsystems.supervisor(&a).is_some());

        std::fs::remove_dir_all(&a).unwrap();
        let changes = discovery.run_once().await.unwrap().unwrap();
        assert_eq!(changes.removed.len(), 1);
        assert!(subsystems.supervisor(&a).is_none());
        assert!(store.index().get_by_path(&a).is_none());
        subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn missing_worktrees_dir_leaves_only_main() {
        let main = tempfile::tempdir().unwrap();
        let (discovery, store, subsystems) =
            service(main.path(), &main.path().join("no-such-dir"));
        discovery.ensure_discovered().await.unwrap();
        assert_eq!(store.index().len(), 1);
        assert!(store.index().iter().all(|w| w.is_main));
        subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn register_and_unregister_publish_index() {
        let main = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let (discovery, store, subsystems) = service(main.path(), root.path());
        let path = make_worktree(root.path(), "new");
        let info = WorktreeInfo::from_path(&path, false);

        assert!(discovery.register(info.clone()).await);
        assert!(!discovery.register(info).await);
        assert!(store.index().get_by_name("new").is_some());
        assert!(subsystems.supervisor(&path).is_some());

        assert!(discovery.unregister(&path).await.is_some());
        assert!(store.index().get_by_name("new").is_none());
        assert!(discovery.unregister(&path).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_pass_is_skipped() {
        let main = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let (discovery, _store, subsystems) = service(main.path(), root.path());
        discovery.scanning.store(true, Ordering::SeqCst);
        assert!(discovery.run_once().await.unwrap().is_none());
        discovery.scanning.store(false, Ordering::SeqCst);
        assert!(discovery.run_once().await.unwrap().is_some());
        subsystems.stop_all().await;
    }
}
