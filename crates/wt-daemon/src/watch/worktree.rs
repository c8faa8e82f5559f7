//! Per-worktree filesystem watch driving gitstatusd refreshes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;

use super::{Debouncer, PathFilter, PathWatcher};
use crate::gitstatusd::GitstatusdSupervisor;

/// Files inside a git directory whose changes move the working-tree counts.
const GIT_DIR_TRIGGERS: [&str; 2] = ["index", "HEAD"];

/// Debounced filesystem watch over one worktree.
pub struct WorktreeWatcher {
    fs: PathWatcher,
    debouncer: Debouncer,
}

/// Filter for a watch rooted at `worktree`.
///
/// Paths in `ignored` are dropped outright. When the worktree owns a git
/// directory (the main checkout), only its index and `HEAD` count; the refs
/// watcher covers the rest.
pub fn worktree_filter(worktree: &Path, ignored: &[PathBuf]) -> PathFilter {
    let mut filter = ignored
        .iter()
        .fold(PathFilter::default(), |filter, path| filter.ignore(path));
    let git_dir = worktree.join(".git");
    if git_dir.is_dir() {
        filter = GIT_DIR_TRIGGERS
            .iter()
            .fold(filter.ignore(&git_dir), |filter, name| filter.keep(git_dir.join(name)));
    }
    filter
}

impl WorktreeWatcher {
    /// Watch the supervisor's worktree, skipping events under `ignored`.
    pub fn start(
        supervisor: Arc<GitstatusdSupervisor>,
        window: Duration,
        ignored: &[PathBuf],
    ) -> Result<Self, notify::Error> {
        let path = supervisor.worktree().to_path_buf();
        let filter = worktree_filter(&path, ignored);
        let debouncer = Debouncer::spawn("worktree-fs", window, move || {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.update_working_status().await }
        });
        let fs = PathWatcher::watch_filtered(&path, RecursiveMode::Recursive, filter, debouncer.handle())?;
        Ok(Self { fs, debouncer })
    }

    /// Drop the watch and wait for a running refresh to finish.
    pub async fn stop(self) {
        drop(self.fs);
        self.debouncer.stop().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn main_checkout_ignores_git_internals_but_not_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        let state = root.join(".wt");
        let filter = worktree_filter(&root, &[state.clone()]);

        assert!(!filter.allows(&state.join("daemon.log")));
        assert!(!filter.allows(&state.join("daemon.sock")));
        assert!(!filter.allows(&root.join(".git/objects/pack")));
        assert!(!filter.allows(&root.join(".git/logs/HEAD")));
        assert!(filter.allows(&root.join(".git/index")));
        assert!(filter.allows(&root.join(".git/HEAD")));
        assert!(filter.allows(&root.join("src/main.rs")));
    }

    #[test]
    fn linked_worktree_keeps_its_git_file_relevant() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join(".git"), "gitdir: /elsewhere\n").unwrap();
        let filter = worktree_filter(&root, &[]);
        assert!(filter.allows(&root.join(".git")));
        assert!(filter.allows(&root.join("notes.md")));
    }
}
