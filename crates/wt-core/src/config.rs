//! Configuration resolution for wt.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/wt/settings.json)
//! 3. Project config (<main_repo>/.wt/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete wt daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary checkout; its `.git` directory is shared by every worktree.
    pub main_repo: PathBuf,
    /// Directory whose immediate children are the secondary worktrees.
    pub worktrees_dir: Option<PathBuf>,
    /// Reference every branch's ahead/behind is measured against.
    pub upstream_branch: String,
    /// Prefix prepended to a worktree name to form its branch.
    pub branch_prefix: String,
    /// State directory holding the socket, pid file and log.
    pub wt_dir: Option<PathBuf>,
    pub log_level: String,
    pub github: GitHubConfig,
    pub gitstatusd: GitstatusdConfig,
    pub timing: TimingConfig,
    pub hooks: HookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_repo: std::env::current_dir().unwrap_or_default(),
            worktrees_dir: None,
            upstream_branch: "main".to_string(),
            branch_prefix: String::new(),
            wt_dir: None,
            log_level: "info".to_string(),
            github: GitHubConfig::default(),
            gitstatusd: GitstatusdConfig::default(),
            timing: TimingConfig::default(),
            hooks: HookConfig::default(),
        }
    }
}

/// Pull-request integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub enabled: bool,
    /// Repository in `owner/name` form.
    pub repo: Option<String>,
    /// API token. Never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub api_url: String,
    pub refresh_interval_ms: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            repo: None,
            token: None,
            api_url: "https://api.github.com".to_string(),
            refresh_interval_ms: 60_000,
        }
    }
}

/// Status helper process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitstatusdConfig {
    /// Explicit binary path; searched on `PATH` when unset.
    pub path: Option<PathBuf>,
    /// Snapshots older than this are reported as stale.
    pub cache_refresh_age_ms: u64,
}

impl Default for GitstatusdConfig {
    fn default() -> Self {
        Self {
            path: None,
            cache_refresh_age_ms: 5_000,
        }
    }
}

/// Refresh intervals and debounce windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub discovery_interval_ms: u64,
    pub fs_debounce_ms: u64,
    pub refs_debounce_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 30_000,
            fs_debounce_ms: 300,
            refs_debounce_ms: 300,
        }
    }
}

/// Post-creation hook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub post_creation_script: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            post_creation_script: None,
            timeout_secs: 60,
        }
    }
}

impl Config {
    /// Worktrees root, defaulting to a `<repo>-worktrees` sibling of the main repo.
    pub fn worktrees_dir(&self) -> PathBuf {
        if let Some(dir) = &self.worktrees_dir {
            return dir.clone();
        }
        let name = self
            .main_repo
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo");
        self.main_repo
            .parent()
            .unwrap_or(&self.main_repo)
            .join(format!("{name}-worktrees"))
    }

    /// State directory, defaulting to `<main_repo>/.wt`.
    pub fn wt_dir(&self) -> PathBuf {
        self.wt_dir
            .clone()
            .unwrap_or_else(|| self.main_repo.join(".wt"))
    }

    /// The RPC socket inside [`wt_dir`](Self::wt_dir).
    pub fn socket_path(&self) -> PathBuf {
        self.wt_dir().join("daemon.sock")
    }

    /// PID file written once the socket is bound.
    pub fn pid_path(&self) -> PathBuf {
        self.wt_dir().join("daemon.pid")
    }

    /// Log file used when the daemon runs detached.
    pub fn log_path(&self) -> PathBuf {
        self.wt_dir().join("daemon.log")
    }

    /// Offline PR fixtures; used instead of GitHub when present.
    pub fn pr_fixtures_path(&self) -> PathBuf {
        self.wt_dir().join("pr_fixtures.json")
    }

    /// `(owner, name)` when `github.repo` is a well-formed `owner/name`.
    pub fn github_slug(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.github.repo.as_deref()?.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }

    /// Interval between periodic discovery passes.
    pub const fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.timing.discovery_interval_ms)
    }

    /// Quiet period before a worktree edit triggers a refresh.
    pub const fn fs_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.fs_debounce_ms)
    }

    /// Quiet period before a refs change recomputes ahead/behind.
    pub const fn refs_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.refs_debounce_ms)
    }

    /// Interval between periodic PR refreshes.
    pub const fn github_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.github.refresh_interval_ms)
    }

    /// Age past which a cached gitstatusd result is stale.
    pub const fn cache_refresh_age(&self) -> Duration {
        Duration::from_millis(self.gitstatusd.cache_refresh_age_ms)
    }

    /// Deadline for the post-creation hook.
    pub const fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.hooks.timeout_secs)
    }

    /// Check the configuration before the daemon binds its socket.
    ///
    /// Creates `wt_dir` as a side effect.
    pub fn validate(&self) -> Result<()> {
        if !self.main_repo.is_dir() {
            return Err(Error::Config(format!(
                "main repository {} is not a directory",
                self.main_repo.display()
            )));
        }
        if !self.main_repo.join(".git").exists() {
            return Err(Error::Config(format!(
                "main repository {} has no .git",
                self.main_repo.display()
            )));
        }
        let worktrees_dir = self.worktrees_dir();
        if worktrees_dir.exists() && !worktrees_dir.is_dir() {
            return Err(Error::Config(format!(
                "worktrees directory {} is not a directory",
                worktrees_dir.display()
            )));
        }
        let wt_dir = self.wt_dir();
        std::fs::create_dir_all(&wt_dir).map_err(|e| {
            Error::Config(format!("cannot create {}: {e}", wt_dir.display()))
        })?;
        if self.github.enabled && self.github_slug().is_none() {
            return Err(Error::Config(
                "github is enabled but github.repo is not set to owner/name".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// `main_repo` is the checkout the daemon serves; its project settings file
/// is read and it overrides whatever the files say about `main_repo`.
pub fn load_config(main_repo: Option<&Path>) -> Result<Config> {
    load_config_from(global_config_path().as_deref(), main_repo, |key| {
        std::env::var(key).ok()
    })
}

/// [`load_config`] with the global file and environment supplied by the caller.
pub fn load_config_from(
    global_path: Option<&Path>,
    main_repo: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(path) = global_path {
        if path.exists() {
            merge_config(&mut merged, load_config_file(path)?);
        }
    }

    if let Some(dir) = main_repo {
        let project_path = dir.join(".wt").join("settings.json");
        if project_path.exists() {
            merge_config(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    if let Some(dir) = main_repo {
        config.main_repo = dir.to_path_buf();
    }

    apply_env_overrides(&mut config, env);
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("wt").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; anything else
/// replaces the base value.
fn merge_config(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_config(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

fn apply_env_overrides(config: &mut Config, env: impl Fn(&str) -> Option<String>) {
    if let Some(val) = env("WT_WORKTREES_DIR") {
        config.worktrees_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = env("WT_UPSTREAM_BRANCH") {
        config.upstream_branch = val;
    }
    if let Some(val) = env("WT_BRANCH_PREFIX") {
        config.branch_prefix = val;
    }
    if let Some(val) = env("WT_DIR") {
        config.wt_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = env("WT_LOG_LEVEL") {
        config.log_level = val;
    }
    if let Some(val) = env("WT_GITHUB_REPO") {
        config.github.repo = Some(val);
    }
    if let Some(val) = env("WT_GITHUB_ENABLED") {
        if let Some(flag) = parse_flag(&val) {
            config.github.enabled = flag;
        }
    }
    if let Some(val) = env("WT_GITHUB_API_URL") {
        config.github.api_url = val;
    }
    if let Some(val) = env("GITHUB_TOKEN") {
        if !val.is_empty() {
            config.github.token = Some(val);
        }
    }
    if let Some(val) = env("WT_GITSTATUSD_PATH") {
        config.gitstatusd.path = Some(PathBuf::from(val));
    }
    if let Some(val) = env("WT_POST_CREATION_SCRIPT") {
        config.hooks.post_creation_script = Some(PathBuf::from(val));
    }
}
