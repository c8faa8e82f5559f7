//! `get_status`: fan out one computation per worktree and merge the caches.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, warn};
use wt_core::Config;
use wt_core::protocol::{
    ComponentState, ComponentStatus, DaemonHealth, GitstatusdState, HealthStatus,
    ReadinessSummary, StatusItem, StatusItemResult, StatusParams, StatusResponse, StatusResult,
    WorktreeId,
};

use crate::collector::Outcome;
use crate::discovery::DiscoveryService;
use crate::git::{SharedGit, run_blocking};
use crate::github::GitHubWatcher;
use crate::registry::WorktreeInfo;
use crate::rpc::{DaemonControl, FromServices, Method, RpcError, Services};
use crate::store::Store;
use crate::subsystems::WorktreeSubsystems;
use crate::task::spawn_logged;
use crate::watch::GitRefsWatcher;

pub const NO_SUPERVISOR: &str = "gitstatusd client unavailable";

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

pub struct StatusDeps {
    config: Arc<Config>,
    git: SharedGit,
    store: Arc<Store>,
    discovery: Arc<DiscoveryService>,
    subsystems: Arc<WorktreeSubsystems>,
    refs: Arc<GitRefsWatcher>,
    github: Arc<GitHubWatcher>,
    control: Arc<DaemonControl>,
}

impl FromServices for StatusDeps {
    fn from_services(s: &Services) -> Self {
        Self {
            config: Arc::clone(&s.config),
            git: Arc::clone(&s.git),
            store: Arc::clone(&s.store),
            discovery: Arc::clone(&s.discovery),
            subsystems: Arc::clone(&s.subsystems),
            refs: Arc::clone(&s.refs),
            github: Arc::clone(&s.github),
            control: Arc::clone(&s.control),
        }
    }
}

/// What one per-worktree task reads from.
struct ItemContext {
    git: SharedGit,
    subsystems: Arc<WorktreeSubsystems>,
    refs: Arc<GitRefsWatcher>,
    github: Arc<GitHubWatcher>,
    cache_refresh_age: Duration,
}

struct WorkingTree {
    dirty: Option<u64>,
    untracked: Option<u64>,
    last_updated_at: Option<DateTime<Utc>>,
    is_cached: bool,
    cache_age_ms: Option<u64>,
    is_stale: bool,
    state: GitstatusdState,
    restarts: u32,
    last_error: Option<String>,
}

impl ItemContext {
    fn working_tree(&self, info: &WorktreeInfo) -> WorkingTree {
        let Some(supervisor) = self.subsystems.supervisor(&info.path) else {
            return WorkingTree {
                dirty: None,
                untracked: None,
                last_updated_at: None,
                is_cached: false,
                cache_age_ms: None,
                is_stale: false,
                state: GitstatusdState::Stopped,
                restarts: 0,
                last_error: Some(NO_SUPERVISOR.to_string()),
            };
        };
        let lifecycle = supervisor.lifecycle();
        let snapshot = supervisor.status();
        let age = snapshot.age();
        let is_stale = age.is_some_and(|age| age > self.cache_refresh_age);

        if snapshot.is_empty() || is_stale {
            let refresh = Arc::clone(&supervisor);
            spawn_logged("gitstatusd-refresh", async move {
                refresh.update_working_status().await;
                Ok(())
            });
        }

        let (dirty, untracked, last_error) = match &snapshot {
            Outcome::Empty => (None, None, None),
            Outcome::Ok { value, .. } => (Some(value.dirty()), Some(value.untracked), None),
            Outcome::Err { error, .. } => (None, None, Some(error.clone())),
        };
        WorkingTree {
            dirty,
            untracked,
            last_updated_at: snapshot.captured_at(),
            is_cached: snapshot.value().is_some(),
            cache_age_ms: age.map(millis),
            is_stale,
            state: lifecycle.state,
            restarts: lifecycle.restarts,
            last_error,
        }
    }

    async fn compute(&self, info: &WorktreeInfo) -> Result<StatusResult, String> {
        let path = info.path.clone();
        let branch = run_blocking(&self.git, move |git| git.head_branch(&path))
            .await
            .map_err(|e| {
                warn!(worktree = %info.name, error = %e, "Cannot read branch");
                format!("cannot read branch: {e}")
            })?;

        let path = info.path.clone();
        let commit_info = match run_blocking(&self.git, move |git| git.commit_info(&path, "HEAD")).await {
            Ok(commit) => Some(commit),
            Err(e) => {
                debug!(worktree = %info.name, error = %e, "No commit info");
                None
            }
        };

        let ahead_behind = branch.as_deref().and_then(|b| self.refs.ahead_behind(b));
        let pr_info = self.github.pr_info(branch.as_deref()).await;
        let tree = self.working_tree(info);

        Ok(StatusResult {
            branch_name: branch,
            dirty_files_lower_bound: tree.dirty,
            untracked_files_lower_bound: tree.untracked,
            last_updated_at: tree.last_updated_at,
            is_cached: tree.is_cached,
            cache_age_ms: tree.cache_age_ms,
            is_stale: tree.is_stale,
            commit_info,
            ahead_count: ahead_behind.map(|ab| ab.ahead),
            behind_count: ahead_behind.map(|ab| ab.behind),
            is_main: info.is_main,
            upstream_branch: self.refs.upstream().to_string(),
            pr_info,
            gitstatusd_state: tree.state,
            restarts: tree.restarts,
            last_error: tree.last_error,
        })
    }
}

enum Target {
    Known(WorktreeInfo),
    Unknown(WorktreeId),
}

async fn status_item(ctx: Arc<ItemContext>, target: Target) -> (WorktreeId, StatusItem) {
    let started = Instant::now();
    let info = match target {
        Target::Known(info) => info,
        Target::Unknown(id) => {
            let name = id.name().unwrap_or_else(|_| id.to_string());
            let item = StatusItem {
                name,
                absolute_path: std::path::PathBuf::new(),
                processing_time_ms: 0,
                result: StatusItemResult::Error {
                    error: format!("worktree not found: {id}"),
                },
            };
            return (id, item);
        }
    };

    let task_info = info.clone();
    let outcome = tokio::spawn(async move { ctx.compute(&task_info).await }).await;
    let result = match outcome {
        Ok(Ok(status)) => StatusItemResult::Ok {
            status: Box::new(status),
        },
        Ok(Err(error)) => StatusItemResult::Error { error },
        Err(e) => {
            error!(worktree = %info.name, error = %e, "Status computation panicked");
            StatusItemResult::Error {
                error: format!("status computation failed: {e}"),
            }
        }
    };
    let item = StatusItem {
        name: info.name,
        absolute_path: info.path,
        processing_time_ms: millis(started.elapsed()),
        result,
    };
    (info.id, item)
}

/// `get_status`: per-worktree status plus daemon health.
pub struct GetStatus;

impl Method for GetStatus {
    const NAME: &'static str = "get_status";
    type Params = StatusParams;
    type Deps = StatusDeps;
    type Output = StatusResponse;

    async fn call(deps: StatusDeps, params: StatusParams) -> Result<StatusResponse, RpcError> {
        let started = Instant::now();
        let (concurrent_requests, _in_flight) = deps.control.begin_status();

        if let Err(e) = deps.discovery.ensure_discovered().await {
            warn!(error = %e, "On-demand discovery failed");
        }

        let index = deps.store.index();
        let targets: Vec<Target> = if params.worktree_ids.is_empty() {
            index.iter().cloned().map(Target::Known).collect()
        } else {
            params
                .worktree_ids
                .iter()
                .map(|id| {
                    index
                        .get_by_id(id)
                        .cloned()
                        .map_or_else(|| Target::Unknown(id.clone()), Target::Known)
                })
                .collect()
        };

        let ctx = Arc::new(ItemContext {
            git: Arc::clone(&deps.git),
            subsystems: Arc::clone(&deps.subsystems),
            refs: Arc::clone(&deps.refs),
            github: Arc::clone(&deps.github),
            cache_refresh_age: deps.config.cache_refresh_age(),
        });
        let items: BTreeMap<WorktreeId, StatusItem> =
            join_all(targets.into_iter().map(|t| status_item(Arc::clone(&ctx), t)))
                .await
                .into_iter()
                .collect();

        let health = Health::gather(&deps);
        Ok(StatusResponse {
            items,
            total_processing_time_ms: millis(started.elapsed()),
            concurrent_requests,
            readiness_summary: ReadinessSummary {
                total_worktrees: index.len(),
                with_gitstatusd: health.running,
                discovery_scanning: deps.discovery.is_scanning(),
                github: health.github_state,
            },
            components: health.components(&deps, index.len()),
            daemon_health: health.daemon_health(deps.github.error_count()),
        })
    }
}

/// Daemon-wide counters read once per `get_status`.
struct Health {
    binary_available: bool,
    running: usize,
    total: usize,
    gitstatusd_errors: Vec<String>,
    github_state: ComponentState,
    github_error: Option<String>,
}

impl Health {
    fn gather(deps: &StatusDeps) -> Self {
        let supervisors = deps.subsystems.supervisors();
        Self {
            binary_available: deps.subsystems.binary().is_some(),
            running: supervisors.iter().filter(|s| s.is_running()).count(),
            total: supervisors.len(),
            gitstatusd_errors: supervisors
                .iter()
                .filter_map(|s| s.status().error().map(str::to_string))
                .collect(),
            github_state: deps.github.component_state(),
            github_error: deps.github.snapshot().error().map(str::to_string),
        }
    }

    fn gitstatusd(&self) -> ComponentStatus {
        let state = if !self.binary_available {
            ComponentState::Error
        } else if self.total > 0 && self.running == self.total && self.gitstatusd_errors.is_empty() {
            ComponentState::Ok
        } else if self.gitstatusd_errors.is_empty() {
            ComponentState::Starting
        } else {
            ComponentState::Error
        };
        let mut status = ComponentStatus::new(state)
            .with_metric("running", self.running as u64)
            .with_metric("total", self.total as u64);
        if !self.binary_available {
            status = status.with_message(crate::gitstatusd::UNAVAILABLE);
        } else if let Some(first) = self.gitstatusd_errors.first() {
            status = status.with_message(first.clone());
        }
        status
    }

    fn components(&self, deps: &StatusDeps, worktrees: usize) -> BTreeMap<String, ComponentStatus> {
        let discovery_state = if deps.discovery.is_scanning() {
            ComponentState::Scanning
        } else if deps.discovery.has_completed() {
            ComponentState::Ok
        } else {
            ComponentState::Starting
        };
        let discovery = ComponentStatus::new(discovery_state).with_metric("worktrees", worktrees as u64);

        let mut github = ComponentStatus::new(self.github_state);
        if let Some(error) = &self.github_error {
            github = github.with_message(error.clone());
        }

        BTreeMap::from([
            ("discovery".to_string(), discovery),
            ("github".to_string(), github),
            ("gitstatusd".to_string(), self.gitstatusd()),
        ])
    }

    fn daemon_health(&self, github_errors: u32) -> DaemonHealth {
        let failing = self.gitstatusd_errors.len();
        let status = if self.total > 0 && failing == self.total {
            HealthStatus::Error
        } else if failing > 0 || !self.binary_available || self.github_state == ComponentState::Error {
            HealthStatus::Warning
        } else {
            HealthStatus::Ok
        };
        DaemonHealth {
            status,
            last_error: self
                .github_error
                .clone()
                .or_else(|| self.gitstatusd_errors.first().cloned()),
            github_errors,
            gitstatusd_errors: u32::try_from(failing).unwrap_or(u32::MAX),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use wt_core::protocol::PrInfo;

    use super::*;
    use crate::testing::{FakeGit, services};

    fn health(binary: bool, running: usize, total: usize, errors: &[&str]) -> Health {
        Health {
            binary_available: binary,
            running,
            total,
            gitstatusd_errors: errors.iter().map(ToString::to_string).collect(),
            github_state: ComponentState::Disabled,
            github_error: None,
        }
    }

    #[test]
    fn gitstatusd_component_is_ok_only_when_all_run() {
        assert_eq!(health(true, 2, 2, &[]).gitstatusd().state, ComponentState::Ok);
        assert_eq!(health(true, 1, 2, &[]).gitstatusd().state, ComponentState::Starting);
        assert_eq!(health(true, 0, 0, &[]).gitstatusd().state, ComponentState::Starting);
        assert_eq!(health(true, 2, 2, &["boom"]).gitstatusd().state, ComponentState::Error);
        let missing = health(false, 0, 1, &[]).gitstatusd();
        assert_eq!(missing.state, ComponentState::Error);
        assert_eq!(missing.metrics.get("total"), Some(&1));
    }

    #[test]
    fn daemon_health_escalates_with_failures() {
        assert_eq!(health(true, 2, 2, &[]).daemon_health(0).status, HealthStatus::Ok);
        let partial = health(true, 1, 2, &["exited"]).daemon_health(3);
        assert_eq!(partial.status, HealthStatus::Warning);
        assert_eq!(partial.last_error.as_deref(), Some("exited"));
        assert_eq!((partial.github_errors, partial.gitstatusd_errors), (3, 1));
        assert_eq!(health(true, 0, 1, &["x"]).daemon_health(0).status, HealthStatus::Error);
    }

    #[tokio::test]
    async fn one_broken_worktree_does_not_affect_siblings() {
        let main = tempfile::tempdir().unwrap();
        let a = main.path().join("worktrees").join("a");
        let b = main.path().join("worktrees").join("b");
        for path in [&a, &b] {
            std::fs::create_dir_all(path).unwrap();
            std::fs::write(path.join(".git"), "gitdir: /dev/null\n").unwrap();
        }
        let (a, b) = (a.canonicalize().unwrap(), b.canonicalize().unwrap());
        let git = FakeGit::default()
            .with_broken_head(&a, "fatal: bad HEAD")
            .with_branch(&b, "feat-b");
        let services = services(main.path(), Arc::new(git));

        let resp = GetStatus::call(StatusDeps::from_services(&services), StatusParams::default())
            .await
            .unwrap();
        let item_a = &resp.items[&WorktreeId::from_name("a")];
        let item_b = &resp.items[&WorktreeId::from_name("b")];
        assert!(item_a.result.error().unwrap().contains("bad HEAD"));
        let status_b = item_b.result.status().unwrap();
        assert_eq!(status_b.branch_name.as_deref(), Some("feat-b"));
        assert_eq!(status_b.ahead_count, None, "refs watcher has not computed yet");
        assert_eq!(status_b.pr_info, PrInfo::Disabled);
        assert_eq!(status_b.upstream_branch, "main");
        assert_eq!(resp.readiness_summary.total_worktrees, 3);
        assert_eq!(resp.components["github"].state, ComponentState::Disabled);
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn unknown_ids_become_error_items() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let params: StatusParams =
            serde_json::from_value(json!({"worktree_ids": [WorktreeId::from_name("ghost")]})).unwrap();
        let resp = GetStatus::call(StatusDeps::from_services(&services), params)
            .await
            .unwrap();
        assert_eq!(resp.items.len(), 1);
        let item = &resp.items[&WorktreeId::from_name("ghost")];
        assert_eq!(item.name, "ghost");
        assert!(item.result.error().unwrap().contains("not found"));
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn missing_binary_reports_unavailable_per_item() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let resp = GetStatus::call(StatusDeps::from_services(&services), StatusParams::default())
            .await
            .unwrap();
        let main_id = WorktreeId::from_name(&main.path().file_name().unwrap().to_string_lossy());
        let status = resp.items[&main_id].result.status().unwrap().clone();
        assert!(status.is_main);
        assert_eq!(status.dirty_files_lower_bound, None);
        assert_eq!(resp.components["gitstatusd"].state, ComponentState::Error);
        assert_eq!(resp.concurrent_requests, 0);
        services.subsystems.stop_all().await;
    }
}
