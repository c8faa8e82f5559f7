//! GitHub REST API client.
//!
//! Uses reqwest to look up the pull request for a head branch.

use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use thiserror::Error;
use tracing::debug;
use wt_core::Config;
use wt_core::protocol::PrData;

use super::types::{PullDetail, PullSummary, pick_pull};

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GitHub API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("PR fixtures error: {0}")]
    Fixture(String),
}

#[derive(Debug)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
}

impl GitHubClient {
    /// Build the client from the `github` config section. Needs `owner/name`.
    pub fn new(config: &Config) -> Result<Self, GitHubError> {
        let (owner, repo) = config
            .github_slug()
            .ok_or_else(|| GitHubError::Config("github.repo must be owner/name".into()))?;
        if config.github.api_url.is_empty() {
            return Err(GitHubError::Config("api_url is empty".into()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("wt-daemon"));
        if let Some(token) = config.github.token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| GitHubError::Config("Invalid token format".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self {
            http,
            api_url: config.github.api_url.trim_end_matches('/').to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }

    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.api_url, self.owner, self.repo, path)
    }

    fn pulls_url(&self, branch: &str) -> Result<Url, GitHubError> {
        let head = format!("{}:{branch}", self.owner);
        Url::parse_with_params(
            &self.api_url("/pulls"),
            [("head", head.as_str()), ("state", "all")],
        )
        .map_err(|e| GitHubError::Config(format!("invalid api_url: {e}")))
    }

    fn check_status(resp: &reqwest::Response) -> Result<(), GitHubError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(GitHubError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown").into(),
            });
        }
        Ok(())
    }

    /// The pull request whose head is `branch`, with diff stats.
    pub async fn find_pull(&self, branch: &str) -> Result<Option<PrData>, GitHubError> {
        let resp = self.http.get(self.pulls_url(branch)?).send().await?;
        Self::check_status(&resp)?;
        let pulls: Vec<PullSummary> = resp.json().await?;
        let Some(pull) = pick_pull(&pulls) else {
            return Ok(None);
        };

        let url = self.api_url(&format!("/pulls/{}", pull.number));
        let resp = self.http.get(&url).send().await?;
        Self::check_status(&resp)?;
        let detail: PullDetail = resp.json().await?;
        debug!(branch, number = detail.number, "Fetched pull request");
        Ok(Some(detail.into()))
    }
}
