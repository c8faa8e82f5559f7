//! Startup handshake lines written to the launcher's dedicated descriptor.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable naming the inherited descriptor number.
pub const HANDSHAKE_FD_ENV: &str = "WT_HANDSHAKE_FD";

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPhase {
    Starting,
    Discovering,
    WarmingUp,
    Ready,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupMessage {
    pub success: bool,
    pub protocol_version: u32,
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub ready: bool,
    pub phase: StartupPhase,
    #[serde(default)]
    pub discovered_worktrees: Option<usize>,
    #[serde(default)]
    pub gitstatusd_path: Option<PathBuf>,
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StartupMessage {
    /// Intermediate milestone.
    pub fn progress(phase: StartupPhase) -> Self {
        Self {
            success: true,
            protocol_version: PROTOCOL_VERSION,
            pid: std::process::id(),
            timestamp: Utc::now(),
            ready: false,
            phase,
            discovered_worktrees: None,
            gitstatusd_path: None,
            socket_path: None,
            error: None,
        }
    }

    /// Final line for a daemon that is accepting connections.
    pub fn ready(socket_path: PathBuf) -> Self {
        Self {
            ready: true,
            socket_path: Some(socket_path),
            ..Self::progress(StartupPhase::Ready)
        }
    }

    /// Final line for a daemon that gave up during `phase`.
    pub fn failure(phase: StartupPhase, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::progress(phase)
        }
    }

    #[must_use]
    pub const fn with_discovered(mut self, count: usize) -> Self {
        self.discovered_worktrees = Some(count);
        self
    }

    #[must_use]
    pub fn with_gitstatusd_path(mut self, path: Option<PathBuf>) -> Self {
        self.gitstatusd_path = path;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_line_is_final_and_successful() {
        let msg = StartupMessage::ready(PathBuf::from("/tmp/d.sock")).with_discovered(2);
        assert!(msg.success && msg.ready);
        assert_eq!(msg.phase, StartupPhase::Ready);
        assert_eq!(msg.discovered_worktrees, Some(2));
        assert_eq!(msg.protocol_version, 1);
    }

    #[test]
    fn failure_line_carries_error() {
        let msg = StartupMessage::failure(StartupPhase::Starting, "main repository missing");
        assert!(!msg.success && !msg.ready);
        assert_eq!(msg.error.as_deref(), Some("main repository missing"));
    }
}
