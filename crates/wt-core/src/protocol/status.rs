//! `get_status` request and response types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::worktree::WorktreeId;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusParams {
    /// Empty means every known worktree.
    #[serde(default)]
    pub worktree_ids: Vec<WorktreeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub items: BTreeMap<WorktreeId, StatusItem>,
    pub total_processing_time_ms: u64,
    pub concurrent_requests: usize,
    pub daemon_health: DaemonHealth,
    pub readiness_summary: ReadinessSummary,
    pub components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusItem {
    pub name: String,
    pub absolute_path: PathBuf,
    pub processing_time_ms: u64,
    pub result: StatusItemResult,
}

/// Outcome for one worktree. A failure here never affects sibling items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusItemResult {
    Ok { status: Box<StatusResult> },
    Error { error: String },
}

impl StatusItemResult {
    /// The status, if this item succeeded.
    pub fn status(&self) -> Option<&StatusResult> {
        match self {
            Self::Ok { status } => Some(status),
            Self::Error { .. } => None,
        }
    }

    /// The error message, if this item failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { error } => Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub branch_name: Option<String>,
    /// Staged plus unstaged; `None` until gitstatusd has answered.
    pub dirty_files_lower_bound: Option<u64>,
    pub untracked_files_lower_bound: Option<u64>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub is_cached: bool,
    pub cache_age_ms: Option<u64>,
    pub is_stale: bool,
    pub commit_info: Option<CommitInfo>,
    /// `None` means not yet computed, which is different from zero.
    pub ahead_count: Option<u64>,
    pub behind_count: Option<u64>,
    pub is_main: bool,
    pub upstream_branch: String,
    pub pr_info: PrInfo,
    pub gitstatusd_state: GitstatusdState,
    pub restarts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub hash: String,
    pub short_hash: String,
    pub message: String,
    pub author: String,
    /// RFC 3339 commit date.
    pub date: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AheadBehind {
    pub ahead: u64,
    pub behind: u64,
}

impl AheadBehind {
    pub const fn new(ahead: u64, behind: u64) -> Self {
        Self { ahead, behind }
    }
}

/// Pull-request lookup result for one branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrInfo {
    /// `pr` is `None` when the branch has no pull request.
    Ok { pr: Option<PrData> },
    Error { error: String },
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrData {
    pub number: u64,
    pub state: PrState,
    #[serde(default)]
    pub draft: bool,
    /// `None` while GitHub is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GitstatusdState {
    Starting,
    Running,
    Restarting,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSummary {
    pub total_worktrees: usize,
    pub with_gitstatusd: usize,
    pub discovery_scanning: bool,
    pub github: ComponentState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Disabled,
    Starting,
    Scanning,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub state: ComponentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, u64>,
}

impl ComponentStatus {
    /// A component in `state` with no message.
    pub const fn new(state: ComponentState) -> Self {
        Self {
            state,
            message: None,
            metrics: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_metric(mut self, key: &str, value: u64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonHealth {
    pub status: HealthStatus,
    pub last_error: Option<String>,
    pub github_errors: u32,
    pub gitstatusd_errors: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Warning,
    Error,
}
