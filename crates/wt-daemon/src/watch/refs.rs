//! Ahead/behind cache driven by the shared `.git` directory.
//!
//! One watcher serves every worktree. Each pass resolves the branch checked
//! out in each known worktree, publishes that set to the store, and replaces
//! the ahead/behind map in one write.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::RecursiveMode;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wt_core::protocol::AheadBehind;

use super::{Debouncer, PathWatcher};
use crate::collector::{Collector, Outcome};
use crate::git::{GitPorcelain, SharedGit, run_blocking};
use crate::store::Store;

pub type AheadBehindMap = HashMap<String, AheadBehind>;

/// Ahead/behind for every branch in `branches` versus `upstream`.
///
/// The upstream itself is `(0, 0)` without asking git. Branches whose lookup
/// fails are left out of the map.
pub fn compute_ahead_behind<'a>(
    git: &dyn GitPorcelain,
    branches: impl IntoIterator<Item = &'a String>,
    upstream: &str,
) -> AheadBehindMap {
    let mut out = HashMap::new();
    for branch in branches {
        if branch == upstream {
            out.insert(branch.clone(), AheadBehind::new(0, 0));
            continue;
        }
        match git.ahead_behind(branch, upstream) {
            Ok(counts) => {
                out.insert(branch.clone(), counts);
            }
            Err(e) => debug!(branch, error = %e, "Skipping ahead/behind"),
        }
    }
    out
}

fn checked_out_branches(git: &dyn GitPorcelain, worktrees: &[PathBuf]) -> BTreeSet<String> {
    worktrees
        .iter()
        .filter_map(|path| match git.head_branch(path) {
            Ok(branch) => branch,
            Err(e) => {
                debug!(worktree = %path.display(), error = %e, "No branch for worktree");
                None
            }
        })
        .collect()
}

struct Running {
    debouncer: Debouncer,
    fs: Option<PathWatcher>,
    follow: JoinHandle<()>,
}

/// Ahead/behind counts for every active branch, recomputed when refs change.
pub struct GitRefsWatcher {
    git: SharedGit,
    store: Arc<Store>,
    upstream: String,
    cache: Collector<AheadBehindMap>,
    running: Mutex<Option<Running>>,
}

impl GitRefsWatcher {
    /// A watcher measuring branches against `upstream`. Nothing runs until [`start`](Self::start).
    pub fn new(git: SharedGit, store: Arc<Store>, upstream: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            git,
            store,
            upstream: upstream.into(),
            cache: Collector::new(),
            running: Mutex::new(None),
        })
    }

    /// The branch counts are measured against.
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    /// The last computed map.
    pub fn snapshot(&self) -> Outcome<AheadBehindMap> {
        self.cache.snapshot()
    }

    /// Cached counts for `branch`; `None` means unknown.
    pub fn ahead_behind(&self, branch: &str) -> Option<AheadBehind> {
        self.cache
            .snapshot()
            .value()
            .and_then(|map| map.get(branch).copied())
    }

    /// Recompute branches and counts for the current worktree set.
    pub async fn refresh(&self) {
        let paths = self.store.index().paths();
        let upstream = self.upstream.clone();
        let result = run_blocking(&self.git, move |git| {
            let branches = checked_out_branches(git, &paths);
            let counts = compute_ahead_behind(git, &branches, &upstream);
            Ok((branches, counts))
        })
        .await;
        match result {
            Ok((branches, counts)) => {
                debug!(branches = branches.len(), computed = counts.len(), "Refreshed ahead/behind");
                self.store.active_branches.set(branches);
                self.cache.ok(counts);
            }
            Err(e) => {
                warn!(error = %e, "Ahead/behind refresh failed");
                self.cache.error(e.to_string());
            }
        }
    }

    /// Run the initial computation, then follow `git_dir` and worktree-set
    /// changes. A missing `git_dir` leaves only the worktree-set trigger.
    pub async fn start(self: &Arc<Self>, git_dir: Option<&Path>, window: Duration) {
        self.refresh().await;

        let this = Arc::clone(self);
        let debouncer = Debouncer::spawn("git-refs", window, move || {
            let this = Arc::clone(&this);
            async move { this.refresh().await }
        });

        let fs = git_dir.and_then(|dir| {
            PathWatcher::watch(dir, RecursiveMode::Recursive, debouncer.handle())
                .inspect_err(|e| warn!(git_dir = %dir.display(), error = %e, "Cannot watch git dir"))
                .ok()
        });

        let handle = debouncer.handle();
        let mut worktrees = self.store.worktrees.subscribe();
        worktrees.borrow_and_update();
        let follow = tokio::spawn(async move {
            while worktrees.changed().await.is_ok() {
                handle.trigger();
            }
        });

        info!(watching = fs.is_some(), "Git refs watcher started");
        if let Ok(mut running) = self.running.lock() {
            *running = Some(Running {
                debouncer,
                fs,
                follow,
            });
        }
    }

    /// Stop watching and cancel any pending recompute.
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        if let Some(Running {
            debouncer,
            fs,
            follow,
        }) = running
        {
            drop(fs);
            follow.abort();
            debouncer.stop().await;
            info!("Git refs watcher stopped");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use crate::testing::{FakeGit, commit, git, init_repo};

    fn branches(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn upstream_is_zero_without_asking_git() {
        let fake = FakeGit::default().forbid("main");
        let map = compute_ahead_behind(&fake, &branches(&["main"]), "main");
        assert_eq!(map.get("main"), Some(&AheadBehind::new(0, 0)));
        assert_eq!(fake.calls(), 0);
    }

    #[test]
    fn failed_branches_are_absent_not_zero() {
        let fake = FakeGit::default().with_ahead_behind("feat", 2, 1);
        let map = compute_ahead_behind(&fake, &branches(&["feat", "gone"]), "main");
        assert_eq!(map.get("feat"), Some(&AheadBehind::new(2, 1)));
        assert!(!map.contains_key("gone"));
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn deleted_branch_is_not_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().canonicalize().unwrap();
        let fake = Arc::new(
            FakeGit::default()
                .with_branch(&main, "feat")
                .with_ahead_behind("feat", 4, 0),
        );
        let store = Arc::new(Store::new(Registry::new(&main).index()));
        let shared: SharedGit = fake.clone();
        let watcher = GitRefsWatcher::new(shared, Arc::clone(&store), "main");

        watcher.refresh().await;
        assert_eq!(watcher.ahead_behind("feat"), Some(AheadBehind::new(4, 0)));
        assert!(store.active_branches.get().contains("feat"));

        fake.delete_branch("feat");
        watcher.refresh().await;
        assert_eq!(watcher.ahead_behind("feat"), None);
        watcher.refresh().await;
        assert_eq!(watcher.ahead_behind("feat"), None);
    }

    #[tokio::test]
    async fn start_computes_before_returning() {
        let repo = init_repo();
        git(repo.path(), &["checkout", "-q", "-b", "feature"]);
        for i in 0..3 {
            commit(repo.path(), &format!("local {i}"));
        }
        let main = repo.path().canonicalize().unwrap();
        let store = Arc::new(Store::new(Registry::new(&main).index()));
        let shared: SharedGit = Arc::new(crate::git::GitCli::new(&main));
        let watcher = GitRefsWatcher::new(shared, store, "main");

        watcher
            .start(Some(&main.join(".git")), Duration::from_millis(50))
            .await;
        assert_eq!(watcher.ahead_behind("feature"), Some(AheadBehind::new(3, 0)));
        watcher.stop().await;
        watcher.stop().await;
    }
}
