//! Git porcelain collaborator.
//!
//! A narrow synchronous interface over the handful of git queries the daemon
//! needs. Calls block, so async code goes through [`run_blocking`].

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use wt_core::protocol::{AheadBehind, CommitInfo};

pub use cli::GitCli;

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed: {stderr}")]
    Command { args: String, stderr: String },

    #[error("No such ref: {0}")]
    NoSuchRef(String),

    #[error("Unexpected git output: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git task failed: {0}")]
    Join(String),
}

/// One entry of `git worktree list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitWorktree {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// The git operations the daemon needs. Calls block; use [`run_blocking`].
pub trait GitPorcelain: Send + Sync + 'static {
    /// Short name of the checked-out branch, `None` when HEAD is detached.
    fn head_branch(&self, worktree: &Path) -> Result<Option<String>, GitError>;

    fn commit_info(&self, worktree: &Path, reference: &str) -> Result<CommitInfo, GitError>;

    /// Full commit sha for `reference` in the shared repository.
    fn resolve_ref(&self, reference: &str) -> Result<String, GitError>;

    fn branch_exists(&self, branch: &str) -> Result<bool, GitError>;

    fn list_worktrees(&self) -> Result<Vec<GitWorktree>, GitError>;

    /// Commits on `branch` not on `upstream`, and the reverse.
    fn ahead_behind(&self, branch: &str, upstream: &str) -> Result<AheadBehind, GitError>;

    /// Check out `branch` at `path`, creating it from `base` if needed.
    fn worktree_add(&self, path: &Path, branch: &str, base: &str) -> Result<(), GitError>;

    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError>;

    /// The `.git` directory every worktree shares.
    fn common_git_dir(&self) -> Result<PathBuf, GitError>;
}

pub type SharedGit = Arc<dyn GitPorcelain>;

/// Run a porcelain call on the blocking pool and rejoin its result.
pub async fn run_blocking<T, F>(git: &SharedGit, f: F) -> Result<T, GitError>
where
    T: Send + 'static,
    F: FnOnce(&dyn GitPorcelain) -> Result<T, GitError> + Send + 'static,
{
    let git = Arc::clone(git);
    tokio::task::spawn_blocking(move || f(git.as_ref()))
        .await
        .map_err(|e| GitError::Join(e.to_string()))?
}
