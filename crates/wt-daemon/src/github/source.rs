//! Where pull request data comes from.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use wt_core::protocol::PrData;

use super::client::{GitHubClient, GitHubError};

#[async_trait]
pub trait PullRequestSource: Send + Sync {
    /// `Ok(None)` when the branch has no pull request.
    async fn pull_request(&self, branch: &str) -> Result<Option<PrData>, GitHubError>;

    fn describe(&self) -> &'static str;
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    async fn pull_request(&self, branch: &str) -> Result<Option<PrData>, GitHubError> {
        self.find_pull(branch).await
    }

    fn describe(&self) -> &'static str {
        "github"
    }
}

/// Offline source backed by a `{branch: PrData | null}` JSON file.
///
/// The file is re-read on every lookup.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    /// Read fixtures from `path` on every fetch.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, Option<PrData>>, GitHubError> {
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| GitHubError::Fixture(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| GitHubError::Fixture(format!("{}: {e}", self.path.display())))
    }
}

#[async_trait]
impl PullRequestSource for FixtureSource {
    async fn pull_request(&self, branch: &str) -> Result<Option<PrData>, GitHubError> {
        Ok(self.load()?.remove(branch).flatten())
    }

    fn describe(&self) -> &'static str {
        "fixtures"
    }
}
