//! gitstatusd request/response wire format.
//!
//! Fields are separated by `0x1f`, records terminated by `0x1e`.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const FIELD_SEP: u8 = 0x1f;
pub const RECORD_SEP: u8 = 0x1e;

/// Fields in a response for a directory inside a repository.
const REPO_FIELDS: usize = 29;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response is not UTF-8")]
    Utf8,

    #[error("response has {got} fields, expected at least {need}")]
    Truncated { got: usize, need: usize },

    #[error("field {index} ({name}) has invalid value {value:?}")]
    InvalidField {
        index: usize,
        name: &'static str,
        value: String,
    },
}

/// Request status for `dir`, computing index counts.
pub fn encode_request(id: &str, dir: &Path) -> Vec<u8> {
    let mut out = Vec::with_capacity(id.len() + dir.as_os_str().len() + 4);
    out.extend_from_slice(id.as_bytes());
    out.push(FIELD_SEP);
    out.extend_from_slice(dir.to_string_lossy().as_bytes());
    out.push(FIELD_SEP);
    out.push(b'0');
    out.push(RECORD_SEP);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoState {
    Normal,
    Merge,
    Rebase,
    RebaseInteractive,
    RebaseMerge,
    Am,
    AmRebase,
    CherryPick,
    Revert,
    Bisect,
}

impl RepoState {
    fn from_wire(raw: &str) -> Option<Self> {
        Some(match raw {
            "" => Self::Normal,
            "merge" => Self::Merge,
            "rebase" => Self::Rebase,
            "rebase-i" => Self::RebaseInteractive,
            "rebase-m" => Self::RebaseMerge,
            "am" => Self::Am,
            "am/rebase" => Self::AmRebase,
            "cherry-pick" => Self::CherryPick,
            "revert" => Self::Revert,
            "bisect" => Self::Bisect,
            _ => return None,
        })
    }
}

/// Everything gitstatusd reports for a directory inside a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub workdir: PathBuf,
    /// `None` in a repository with no commits.
    pub commit: Option<String>,
    pub local_branch: Option<String>,
    pub upstream_branch: Option<String>,
    pub remote_name: Option<String>,
    pub remote_url: Option<String>,
    pub state: RepoState,
    pub index_size: u64,
    pub staged: u64,
    pub unstaged: u64,
    pub conflicted: u64,
    pub untracked: u64,
    pub ahead: u64,
    pub behind: u64,
    pub stashes: u64,
    pub tag: Option<String>,
    pub unstaged_deleted: u64,
    pub staged_new: u64,
    pub staged_deleted: u64,
    pub push_remote_name: Option<String>,
    pub push_remote_url: Option<String>,
    pub push_ahead: u64,
    pub push_behind: u64,
    pub skip_worktree: u64,
    pub assume_unchanged: u64,
    pub commit_encoding: Option<String>,
    pub commit_summary: Option<String>,
}

/// One parsed response record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReply {
    pub id: String,
    /// `None` when the directory is not inside a repository.
    pub repo: Option<RepoStatus>,
}

struct Fields<'a>(Vec<&'a str>);

impl<'a> Fields<'a> {
    fn text(&self, index: usize) -> &'a str {
        self.0.get(index).copied().unwrap_or_default()
    }

    fn optional(&self, index: usize) -> Option<String> {
        let raw = self.text(index);
        (!raw.is_empty()).then(|| raw.to_string())
    }

    fn count(&self, index: usize, name: &'static str) -> Result<u64, ProtocolError> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| ProtocolError::InvalidField {
            index,
            name,
            value: raw.to_string(),
        })
    }

    fn commit(&self, index: usize) -> Result<Option<String>, ProtocolError> {
        let raw = self.text(index);
        if raw.is_empty() {
            return Ok(None);
        }
        if raw.len() != 40 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidField {
                index,
                name: "commit",
                value: raw.to_string(),
            });
        }
        Ok(Some(raw.to_string()))
    }
}

/// Parse one record, with or without its trailing `0x1e`.
pub fn parse_response(raw: &[u8]) -> Result<StatusReply, ProtocolError> {
    let raw = raw.strip_suffix(&[RECORD_SEP]).unwrap_or(raw);
    let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::Utf8)?;
    let fields = Fields(text.split(char::from(FIELD_SEP)).collect());
    if fields.0.len() < 2 {
        return Err(ProtocolError::Truncated {
            got: fields.0.len(),
            need: 2,
        });
    }
    let id = fields.text(0).to_string();
    match fields.text(1) {
        "0" => return Ok(StatusReply { id, repo: None }),
        "1" => {}
        other => {
            return Err(ProtocolError::InvalidField {
                index: 1,
                name: "is_repository",
                value: other.to_string(),
            });
        }
    }
    if fields.0.len() < REPO_FIELDS {
        return Err(ProtocolError::Truncated {
            got: fields.0.len(),
            need: REPO_FIELDS,
        });
    }

    let state_raw = fields.text(8);
    let state = RepoState::from_wire(state_raw).ok_or_else(|| ProtocolError::InvalidField {
        index: 8,
        name: "repo_state",
        value: state_raw.to_string(),
    })?;

    let repo = RepoStatus {
        workdir: PathBuf::from(fields.text(2)),
        commit: fields.commit(3)?,
        local_branch: fields.optional(4),
        upstream_branch: fields.optional(5),
        remote_name: fields.optional(6),
        remote_url: fields.optional(7),
        state,
        index_size: fields.count(9, "index_size")?,
        staged: fields.count(10, "staged")?,
        unstaged: fields.count(11, "unstaged")?,
        conflicted: fields.count(12, "conflicted")?,
        untracked: fields.count(13, "untracked")?,
        ahead: fields.count(14, "ahead")?,
        behind: fields.count(15, "behind")?,
        stashes: fields.count(16, "stashes")?,
        tag: fields.optional(17),
        unstaged_deleted: fields.count(18, "unstaged_deleted")?,
        staged_new: fields.count(19, "staged_new")?,
        staged_deleted: fields.count(20, "staged_deleted")?,
        push_remote_name: fields.optional(21),
        push_remote_url: fields.optional(22),
        push_ahead: fields.count(23, "push_ahead")?,
        push_behind: fields.count(24, "push_behind")?,
        skip_worktree: fields.count(25, "skip_worktree")?,
        assume_unchanged: fields.count(26, "assume_unchanged")?,
        commit_encoding: fields.optional(27),
        commit_summary: fields.optional(28),
    };
    Ok(StatusReply {
        id,
        repo: Some(repo),
    })
}
