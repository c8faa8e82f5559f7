//! Per-worktree subsystems: one gitstatusd supervisor and one filesystem
//! watcher for every known worktree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::gitstatusd::GitstatusdSupervisor;
use crate::registry::WorktreeInfo;
use crate::task::spawn_logged;
use crate::watch::WorktreeWatcher;

struct Slot {
    supervisor: Arc<GitstatusdSupervisor>,
    watcher: Option<WorktreeWatcher>,
}

/// The supervisor and watcher of every started worktree, keyed by path.
pub struct WorktreeSubsystems {
    binary: Option<PathBuf>,
    fs_debounce: Duration,
    ignored: Vec<PathBuf>,
    slots: Mutex<HashMap<PathBuf, Slot>>,
    closed: AtomicBool,
}

impl WorktreeSubsystems {
    /// `binary` is the located gitstatusd, `None` when unavailable.
    pub fn new(binary: Option<PathBuf>, fs_debounce: Duration) -> Self {
        Self {
            binary,
            fs_debounce,
            ignored: Vec::new(),
            slots: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Paths whose changes never trigger a worktree refresh, such as the
    /// daemon's own state directory.
    #[must_use]
    pub fn with_ignored(mut self, ignored: Vec<PathBuf>) -> Self {
        self.ignored = ignored;
        self
    }

    /// The gitstatusd binary every supervisor runs.
    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }

    /// Start the supervisor and watcher for `info`. No-op if already
    /// started, or once [`stop_all`](Self::stop_all) has run.
    pub fn start(&self, info: &WorktreeInfo) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        if self.closed.load(Ordering::Acquire) {
            debug!(worktree = %info.name, "Subsystems closed, not starting");
            return;
        }
        if slots.contains_key(&info.path) {
            return;
        }
        let supervisor = Arc::new(GitstatusdSupervisor::new(
            info.path.clone(),
            self.binary.clone(),
        ));
        let watcher = match WorktreeWatcher::start(Arc::clone(&supervisor), self.fs_debounce, &self.ignored) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(worktree = %info.path.display(), error = %e, "Cannot watch worktree");
                None
            }
        };

        let warm = Arc::clone(&supervisor);
        spawn_logged("gitstatusd-warmup", async move {
            warm.update_working_status().await;
            Ok(())
        });

        slots.insert(
            info.path.clone(),
            Slot {
                supervisor,
                watcher,
            },
        );
        info!(worktree = %info.name, "Worktree subsystems started");
    }

    /// Stop and forget the subsystems for `path`.
    pub async fn stop(&self, path: &Path) {
        let slot = self.slots.lock().ok().and_then(|mut s| s.remove(path));
        if let Some(slot) = slot {
            Self::shutdown(slot).await;
            info!(worktree = %path.display(), "Worktree subsystems stopped");
        }
    }

    /// Stop every worktree and refuse further starts.
    pub async fn stop_all(&self) {
        let slots: Vec<Slot> = self
            .slots
            .lock()
            .map(|mut s| {
                self.closed.store(true, Ordering::Release);
                s.drain().map(|(_, slot)| slot).collect()
            })
            .unwrap_or_default();
        let count = slots.len();
        futures::future::join_all(slots.into_iter().map(Self::shutdown)).await;
        info!(count, "All worktree subsystems stopped");
    }

    async fn shutdown(slot: Slot) {
        if let Some(watcher) = slot.watcher {
            watcher.stop().await;
        }
        slot.supervisor.stop().await;
    }

    /// The supervisor for `path`, if that worktree is started.
    pub fn supervisor(&self, path: &Path) -> Option<Arc<GitstatusdSupervisor>> {
        self.slots
            .lock()
            .ok()
            .and_then(|s| s.get(path).map(|slot| Arc::clone(&slot.supervisor)))
    }

    /// Every running supervisor, in no particular order.
    pub fn supervisors(&self) -> Vec<Arc<GitstatusdSupervisor>> {
        self.slots
            .lock()
            .map(|s| s.values().map(|slot| Arc::clone(&slot.supervisor)).collect())
            .unwrap_or_default()
    }

    /// Number of started worktrees.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
