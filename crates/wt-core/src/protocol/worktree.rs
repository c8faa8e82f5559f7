//! Worktree identifiers and the worktree management methods' payloads.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const ID_PREFIX: &str = "wt-";

/// Opaque, reversible encoding of a worktree name used on the wire.
///
/// Names are arbitrary directory names; the id is `wt-` followed by the
/// hex encoding of the name's UTF-8 bytes, so it is safe in any JSON key or
/// shell argument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorktreeId(String);

impl WorktreeId {
    /// Id for the worktree named `name`.
    pub fn from_name(name: &str) -> Self {
        Self(format!("{ID_PREFIX}{}", hex::encode(name.as_bytes())))
    }

    /// Accept a string only if it decodes back to a name.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = Self(raw.to_string());
        id.name()?;
        Ok(id)
    }

    /// Decode the worktree name back out of the id.
    pub fn name(&self) -> Result<String> {
        let encoded = self
            .0
            .strip_prefix(ID_PREFIX)
            .ok_or_else(|| Error::InvalidWorktreeId(self.0.clone()))?;
        let bytes =
            hex::decode(encoded).map_err(|_| Error::InvalidWorktreeId(self.0.clone()))?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidWorktreeId(self.0.clone()))
    }

    /// The id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorktreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parameters for methods that take none. Extra keys are ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NoParams {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorktreeSummary {
    pub wtid: WorktreeId,
    pub name: String,
    pub absolute_path: PathBuf,
    pub branch: Option<String>,
    pub exists: bool,
    pub is_main: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeListResult {
    pub worktrees: Vec<WorktreeSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorktreeCreateParams {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeCreateResult {
    pub wtid: WorktreeId,
    pub name: String,
    pub absolute_path: PathBuf,
    pub branch: String,
    pub hook: Option<HookRunResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorktreeDeleteParams {
    pub wtid: WorktreeId,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorktreeIdentifyParams {
    pub absolute_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorktreeGetByNameParams {
    pub name: String,
}

/// Outcome of the post-creation hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookRunResult {
    pub ran: bool,
    pub exit_code: Option<i32>,
    /// Previews, truncated.
    pub stdout: String,
    pub stderr: String,
    pub error: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Whether output was also sent as `hook_output` events.
    pub streamed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResult {
    pub message: String,
    pub daemon_pid: u32,
    pub started_at: DateTime<Utc>,
    pub discovered_worktrees: usize,
}
