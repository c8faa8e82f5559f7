//! Per-worktree gitstatusd process supervisor.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};
use wt_core::protocol::GitstatusdState;

use super::protocol::{self, ProtocolError, RECORD_SEP};
use crate::collector::{Collector, Outcome};

const SPAWN_ARGS: [&str; 8] = [
    "--num-threads=8",
    "--max-num-staged=-1",
    "--max-num-unstaged=-1",
    "--max-num-conflicted=-1",
    "--max-num-untracked=-1",
    "--max-commit-summary-length=0",
    "--repo-ttl-seconds=3600",
    "--log-level=FATAL",
];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum GitstatusdError {
    #[error("{}", super::UNAVAILABLE)]
    Unavailable,

    #[error("Failed to spawn gitstatusd: {0}")]
    Spawn(std::io::Error),

    #[error("gitstatusd I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("gitstatusd protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("gitstatusd exited")]
    Exited,

    #[error("gitstatusd did not answer within {0:?}")]
    Timeout(Duration),

    #[error("gitstatusd answered request {got}, expected {expected}")]
    IdMismatch { expected: String, got: String },
}

/// Working-tree counts for one worktree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitstatusdSnapshot {
    pub staged: u64,
    pub unstaged: u64,
    pub conflicted: u64,
    pub untracked: u64,
    pub branch: Option<String>,
    pub commit: Option<String>,
}

impl GitstatusdSnapshot {
    /// Staged plus unstaged files.
    pub const fn dirty(&self) -> u64 {
        self.staged + self.unstaged
    }
}

/// Process health as reported in status results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: GitstatusdState,
    pub restarts: u32,
}

struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Helper {
    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn query(&mut self, dir: &Path) -> Result<protocol::StatusReply, GitstatusdError> {
        let id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        self.stdin
            .write_all(&protocol::encode_request(&id, dir))
            .await?;
        self.stdin.flush().await?;

        let mut buf = Vec::new();
        let n = self.stdout.read_until(RECORD_SEP, &mut buf).await?;
        if n == 0 {
            return Err(GitstatusdError::Exited);
        }
        let reply = protocol::parse_response(&buf)?;
        if reply.id != id {
            return Err(GitstatusdError::IdMismatch {
                expected: id,
                got: reply.id,
            });
        }
        Ok(reply)
    }
}

/// Owns one gitstatusd process and the latest snapshot it produced.
pub struct GitstatusdSupervisor {
    worktree: PathBuf,
    binary: Option<PathBuf>,
    process: Mutex<Option<Helper>>,
    status: Collector<GitstatusdSnapshot>,
    lifecycle: watch::Sender<Lifecycle>,
}

impl GitstatusdSupervisor {
    /// `binary` is `None` when no helper could be located; the supervisor
    /// then only ever reports [`GitstatusdError::Unavailable`].
    pub fn new(worktree: PathBuf, binary: Option<PathBuf>) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle {
            state: GitstatusdState::Starting,
            restarts: 0,
        });
        Self {
            worktree,
            binary,
            process: Mutex::new(None),
            status: Collector::new(),
            lifecycle,
        }
    }

    /// The worktree this helper serves.
    pub fn worktree(&self) -> &Path {
        &self.worktree
    }

    /// Latest cached snapshot. Never blocks.
    pub fn status(&self) -> Outcome<GitstatusdSnapshot> {
        self.status.snapshot()
    }

    /// Current state and restart count.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Whether the helper process is alive.
    pub fn is_running(&self) -> bool {
        match self.process.try_lock() {
            Ok(mut guard) => guard.as_mut().is_some_and(|helper| !helper.has_exited()),
            // An update holds the lock, so the process was alive a moment ago.
            Err(_) => matches!(
                self.lifecycle().state,
                GitstatusdState::Running | GitstatusdState::Restarting
            ),
        }
    }

    fn set_state(&self, state: GitstatusdState) {
        self.lifecycle.send_modify(|l| l.state = state);
    }

    /// Spawn the helper if it is not already alive.
    pub async fn start(&self) -> Result<(), GitstatusdError> {
        let mut guard = self.process.lock().await;
        self.ensure_running(&mut guard).await
    }

    async fn ensure_running(&self, slot: &mut Option<Helper>) -> Result<(), GitstatusdError> {
        if slot.as_mut().is_some_and(|helper| !helper.has_exited()) {
            return Ok(());
        }
        let restarting = match slot.as_mut() {
            Some(helper) => {
                let status = helper.child.try_wait().ok().flatten();
                warn!(worktree = %self.worktree.display(), ?status, "gitstatusd exited, restarting");
                true
            }
            None => !matches!(
                self.lifecycle().state,
                GitstatusdState::Starting | GitstatusdState::Stopped
            ),
        };
        *slot = None;

        let Some(binary) = &self.binary else {
            self.set_state(GitstatusdState::Failed);
            self.status.error(super::UNAVAILABLE);
            return Err(GitstatusdError::Unavailable);
        };

        let mut child = Command::new(binary)
            .args(SPAWN_ARGS)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                self.set_state(GitstatusdState::Failed);
                GitstatusdError::Spawn(e)
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            self.set_state(GitstatusdState::Failed);
            return Err(GitstatusdError::Spawn(std::io::Error::other(
                "gitstatusd pipes unavailable",
            )));
        };
        *slot = Some(Helper {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        });

        if restarting {
            self.lifecycle.send_modify(|l| {
                l.state = GitstatusdState::Restarting;
                l.restarts += 1;
            });
        } else {
            self.set_state(GitstatusdState::Starting);
        }
        info!(worktree = %self.worktree.display(), restarting, "Started gitstatusd");
        Ok(())
    }

    /// Ask the helper for fresh counts and store the result.
    ///
    /// Returns immediately if another update is already in flight.
    pub async fn update_working_status(&self) {
        let Ok(mut guard) = self.process.try_lock() else {
            debug!(worktree = %self.worktree.display(), "gitstatusd update already in flight");
            return;
        };
        if let Err(e) = self.ensure_running(&mut guard).await {
            warn!(worktree = %self.worktree.display(), error = %e, "gitstatusd not available");
            self.status.error(e.to_string());
            return;
        }
        let Some(helper) = guard.as_mut() else {
            return;
        };

        let result = match tokio::time::timeout(REQUEST_TIMEOUT, helper.query(&self.worktree)).await {
            Ok(result) => result,
            Err(_) => Err(GitstatusdError::Timeout(REQUEST_TIMEOUT)),
        };
        match result {
            Ok(reply) => {
                let snapshot = reply.repo.map_or_else(GitstatusdSnapshot::default, |repo| {
                    GitstatusdSnapshot {
                        staged: repo.staged,
                        unstaged: repo.unstaged,
                        conflicted: repo.conflicted,
                        untracked: repo.untracked,
                        branch: repo.local_branch,
                        commit: repo.commit,
                    }
                });
                debug!(
                    worktree = %self.worktree.display(),
                    dirty = snapshot.dirty(),
                    untracked = snapshot.untracked,
                    "gitstatusd snapshot"
                );
                self.status.ok(snapshot);
                self.set_state(GitstatusdState::Running);
            }
            Err(e) => {
                warn!(worktree = %self.worktree.display(), error = %e, "gitstatusd update failed");
                self.status.error(format!("gitstatusd update failed: {e}"));
                // The stream may be mid-record; a fresh process is the only safe reader.
                if let Some(mut helper) = guard.take() {
                    helper.child.start_kill().ok();
                }
            }
        }
    }

    /// Terminate the helper. Safe to call repeatedly.
    pub async fn stop(&self) {
        let mut guard = self.process.lock().await;
        if let Some(helper) = guard.take() {
            let Helper { mut child, stdin, .. } = helper;
            drop(stdin);
            crate::process::terminate(&mut child, TERMINATE_GRACE, "gitstatusd").await;
        }
        self.set_state(GitstatusdState::Stopped);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FAKE_GITSTATUSD, write_script};

    #[tokio::test]
    async fn missing_binary_reports_unavailable() {
        let sup = GitstatusdSupervisor::new(PathBuf::from("/w"), None);
        sup.update_working_status().await;
        assert_eq!(sup.status().error(), Some(super::super::UNAVAILABLE));
        assert_eq!(sup.lifecycle().state, GitstatusdState::Failed);
        assert!(!sup.is_running());
    }

    #[tokio::test]
    async fn update_caches_counts_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let bin = write_script(dir.path(), "gitstatusd", FAKE_GITSTATUSD);
        let sup = GitstatusdSupervisor::new(dir.path().to_path_buf(), Some(bin));

        assert!(sup.status().is_empty());
        sup.start().await.unwrap();
        sup.start().await.unwrap();
        assert_eq!(sup.lifecycle().restarts, 0);
        sup.update_working_status().await;

        let snap = sup.status();
        let value = snap.value().unwrap();
        assert_eq!((value.staged, value.unstaged, value.untracked), (1, 2, 4));
        assert_eq!(value.dirty(), 3);
        assert_eq!(value.branch.as_deref(), Some("main"));
        assert!(sup.is_running());
        assert_eq!(sup.lifecycle().state, GitstatusdState::Running);

        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_running());
        assert_eq!(sup.lifecycle().state, GitstatusdState::Stopped);
    }

    #[tokio::test]
    async fn dead_helper_is_respawned_and_counted() {
        let dir = tempfile::tempdir().unwrap();
        let script = FAKE_GITSTATUSD.replace(r#"if [ -n "$EXIT_AFTER_ONE" ]; then exit 0; fi"#, "exit 0");
        let bin = write_script(dir.path(), "gitstatusd", &script);
        let sup = GitstatusdSupervisor::new(dir.path().to_path_buf(), Some(bin));

        sup.update_working_status().await;
        assert!(sup.status().value().is_some());

        // The helper exits after one answer; give it time to be reaped.
        for _ in 0..50 {
            if !sup.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        sup.update_working_status().await;
        assert!(sup.status().value().is_some());
        assert_eq!(sup.lifecycle().restarts, 1);
        sup.stop().await;
    }
}
