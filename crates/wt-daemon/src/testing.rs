//! Shared fixtures for unit tests.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wt_core::Config;
use wt_core::protocol::{AheadBehind, CommitInfo};

use crate::discovery::DiscoveryService;
use crate::git::{GitError, GitPorcelain, GitWorktree, SharedGit};
use crate::github::GitHubWatcher;
use crate::registry::Registry;
use crate::rpc::{DaemonControl, Services};
use crate::store::Store;
use crate::subsystems::WorktreeSubsystems;
use crate::watch::GitRefsWatcher;

/// Run git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "wt test")
        .env("GIT_AUTHOR_EMAIL", "wt@example.com")
        .env("GIT_COMMITTER_NAME", "wt test")
        .env("GIT_COMMITTER_EMAIL", "wt@example.com")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn commit(dir: &Path, message: &str) {
    git(dir, &["commit", "--allow-empty", "-q", "-m", message]);
}

/// A fresh repository on `main` with one commit.
pub fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    git(dir.path(), &["init", "-q", "-b", "main"]);
    commit(dir.path(), "init");
    dir
}

/// In-memory porcelain with per-path and per-branch answers.
#[derive(Default)]
pub struct FakeGit {
    pub branches: Mutex<HashMap<PathBuf, Result<Option<String>, String>>>,
    pub ahead_behind: Mutex<HashMap<String, AheadBehind>>,
    /// Branch whose ahead/behind lookup panics.
    pub forbidden_branch: Option<String>,
    pub ahead_behind_calls: AtomicUsize,
}

impl FakeGit {
    pub fn with_branch(self, path: &Path, branch: &str) -> Self {
        self.branches
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Ok(Some(branch.to_string())));
        self
    }

    pub fn with_broken_head(self, path: &Path, message: &str) -> Self {
        self.branches
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), Err(message.to_string()));
        self
    }

    pub fn with_ahead_behind(self, branch: &str, ahead: u64, behind: u64) -> Self {
        self.ahead_behind
            .lock()
            .unwrap()
            .insert(branch.to_string(), AheadBehind::new(ahead, behind));
        self
    }

    pub fn forbid(mut self, branch: &str) -> Self {
        self.forbidden_branch = Some(branch.to_string());
        self
    }

    pub fn delete_branch(&self, branch: &str) {
        self.ahead_behind.lock().unwrap().remove(branch);
    }

    pub fn calls(&self) -> usize {
        self.ahead_behind_calls.load(Ordering::SeqCst)
    }
}

impl GitPorcelain for FakeGit {
    fn head_branch(&self, worktree: &Path) -> Result<Option<String>, GitError> {
        match self.branches.lock().unwrap().get(worktree) {
            Some(Ok(branch)) => Ok(branch.clone()),
            Some(Err(message)) => Err(GitError::Command {
                args: "symbolic-ref".into(),
                stderr: message.clone(),
            }),
            None => Ok(None),
        }
    }

    fn commit_info(&self, _worktree: &Path, _reference: &str) -> Result<CommitInfo, GitError> {
        Ok(CommitInfo {
            hash: "0123456789abcdef0123456789abcdef01234567".into(),
            short_hash: "01234567".into(),
            message: "fake commit".into(),
            author: "wt test".into(),
            date: "2026-01-01T00:00:00+00:00".into(),
        })
    }

    fn resolve_ref(&self, reference: &str) -> Result<String, GitError> {
        Err(GitError::NoSuchRef(reference.to_string()))
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError> {
        Ok(self.ahead_behind.lock().unwrap().contains_key(branch))
    }

    fn list_worktrees(&self) -> Result<Vec<GitWorktree>, GitError> {
        Ok(Vec::new())
    }

    fn ahead_behind(&self, branch: &str, _upstream: &str) -> Result<AheadBehind, GitError> {
        self.ahead_behind_calls.fetch_add(1, Ordering::SeqCst);
        if self.forbidden_branch.as_deref() == Some(branch) {
            panic!("ahead_behind must not be called for {branch}");
        }
        self.ahead_behind
            .lock()
            .unwrap()
            .get(branch)
            .copied()
            .ok_or_else(|| GitError::NoSuchRef(branch.to_string()))
    }

    fn worktree_add(&self, path: &Path, _branch: &str, _base: &str) -> Result<(), GitError> {
        std::fs::create_dir_all(path)?;
        std::fs::write(path.join(".git"), "gitdir: /dev/null\n")?;
        Ok(())
    }

    fn worktree_remove(&self, path: &Path, _force: bool) -> Result<(), GitError> {
        std::fs::remove_dir_all(path)?;
        Ok(())
    }

    fn common_git_dir(&self) -> Result<PathBuf, GitError> {
        Err(GitError::Parse("fake repository has no git dir".into()))
    }
}

/// Write an executable bash script named `name` into `dir`.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/usr/bin/env bash\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A stand-in gitstatusd answering every request with staged=1, unstaged=2,
/// untracked=4 on branch `main`.
pub const FAKE_GITSTATUSD: &str = r#"
if [ "$1" = "--version" ]; then echo "v1.5.4"; exit 0; fi
while IFS= read -r -d $'\x1e' req; do
  id="${req%%$'\x1f'*}"
  rest="${req#*$'\x1f'}"
  dir="${rest%%$'\x1f'*}"
  printf '%s\x1f1\x1f%s\x1f%s\x1fmain\x1f\x1f\x1f\x1f\x1f3\x1f1\x1f2\x1f0\x1f4\x1f0\x1f0\x1f0\x1f\x1f0\x1f0\x1f0\x1f\x1f\x1f0\x1f0\x1f0\x1f0\x1f\x1f\x1e' \
    "$id" "$dir" "0123456789abcdef0123456789abcdef01234567"
  if [ -n "$EXIT_AFTER_ONE" ]; then exit 0; fi
done
"#;

/// A service container rooted at `main` with GitHub disabled and no
/// gitstatusd binary. Worktrees live under `main/worktrees`.
pub fn services(main: &Path, git: SharedGit) -> Arc<Services> {
    let config = Config {
        main_repo: main.to_path_buf(),
        worktrees_dir: Some(main.join("worktrees")),
        wt_dir: Some(main.join(".wt")),
        ..Config::default()
    };
    let store = Arc::new(Store::new(Registry::new(main).index()));
    let subsystems = Arc::new(WorktreeSubsystems::new(None, Duration::from_millis(50)));
    let discovery = DiscoveryService::new(
        main,
        config.worktrees_dir(),
        Arc::clone(&store),
        Arc::clone(&subsystems),
    );
    let refs = GitRefsWatcher::new(Arc::clone(&git), Arc::clone(&store), config.upstream_branch.clone());
    let github = GitHubWatcher::disabled(Arc::clone(&store));
    Arc::new(Services {
        config: Arc::new(config),
        git,
        store,
        discovery,
        subsystems,
        refs,
        github,
        control: Arc::new(DaemonControl::new()),
    })
}
