//! GitHub REST v3 pull request payloads (subset of fields).

use chrono::{DateTime, Utc};
use serde::Deserialize;
use wt_core::protocol::{PrData, PrState};

/// Entry of `GET /repos/{owner}/{repo}/pulls`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullSummary {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullSummary {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

/// `GET /repos/{owner}/{repo}/pulls/{number}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PullDetail {
    pub number: u64,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl From<PullDetail> for PrData {
    fn from(pull: PullDetail) -> Self {
        let state = if pull.merged || pull.merged_at.is_some() {
            PrState::Merged
        } else if pull.state == "open" {
            PrState::Open
        } else {
            PrState::Closed
        };
        Self {
            number: pull.number,
            state,
            draft: pull.draft,
            mergeable: pull.mergeable,
            merged_at: pull.merged_at,
            additions: pull.additions,
            deletions: pull.deletions,
            title: pull.title,
            url: pull.html_url,
        }
    }
}

/// The pull request to show for a branch: the first open one, else the most
/// recent of any state. GitHub lists newest first.
pub fn pick_pull(pulls: &[PullSummary]) -> Option<&PullSummary> {
    pulls.iter().find(|p| p.is_open()).or_else(|| pulls.first())
}
