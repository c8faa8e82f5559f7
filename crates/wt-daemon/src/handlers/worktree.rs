//! Worktree management methods.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};
use wt_core::Config;
use wt_core::protocol::{
    NoParams, Operation, ProgressEvent, ProgressStep, StreamEvent, WorktreeCreateParams,
    WorktreeCreateResult, WorktreeDeleteParams, WorktreeGetByNameParams, WorktreeIdentifyParams,
    WorktreeListResult, WorktreeSummary,
};

use crate::discovery::DiscoveryService;
use crate::git::{SharedGit, run_blocking};
use crate::hooks;
use crate::registry::WorktreeInfo;
use crate::rpc::{EventSink, FromServices, Method, RpcError, Services, StreamMethod};
use crate::store::Store;

/// Reject names that could escape the worktrees directory or read as flags.
pub fn validate_name(name: &str) -> Result<(), RpcError> {
    if name.is_empty() {
        return Err(RpcError::InvalidParams("name cannot be empty".into()));
    }
    if name.starts_with('-') {
        return Err(RpcError::InvalidParams("name cannot start with a dash".into()));
    }
    if name.contains("..") {
        return Err(RpcError::InvalidParams("name cannot contain '..'".into()));
    }
    if name.contains('/') {
        return Err(RpcError::InvalidParams("name cannot contain '/'".into()));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(RpcError::InvalidParams(format!(
            "name contains invalid characters: {name}"
        )));
    }
    Ok(())
}

async fn branch_of(git: &SharedGit, path: &Path) -> Option<String> {
    let path = path.to_path_buf();
    run_blocking(git, move |git| git.head_branch(&path))
        .await
        .ok()
        .flatten()
}

async fn summarize(git: &SharedGit, info: &WorktreeInfo) -> WorktreeSummary {
    info.summary(branch_of(git, &info.path).await)
}

fn progress(events: &EventSink, step: ProgressStep, fraction: f32, message: &str) {
    let mut event = ProgressEvent::new(Operation::WorktreeCreate, step, fraction);
    event.message = Some(message.to_string());
    events.emit(&StreamEvent::Progress(event));
}

/// `worktree_list`
pub struct WorktreeList;

impl Method for WorktreeList {
    const NAME: &'static str = "worktree_list";
    type Params = NoParams;
    type Deps = (SharedGit, Arc<Store>, Arc<DiscoveryService>);
    type Output = WorktreeListResult;

    async fn call(
        (git, store, discovery): Self::Deps,
        _: NoParams,
    ) -> Result<WorktreeListResult, RpcError> {
        discovery
            .ensure_discovered()
            .await
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        let index = store.index();
        let worktrees = join_all(index.iter().map(|info| summarize(&git, info))).await;
        Ok(WorktreeListResult { worktrees })
    }
}

/// `worktree_identify`: the worktree containing an absolute path.
pub struct WorktreeIdentify;

impl Method for WorktreeIdentify {
    const NAME: &'static str = "worktree_identify";
    type Params = WorktreeIdentifyParams;
    type Deps = (SharedGit, Arc<Store>, Arc<DiscoveryService>);
    type Output = WorktreeSummary;

    async fn call(
        (git, store, discovery): Self::Deps,
        params: WorktreeIdentifyParams,
    ) -> Result<WorktreeSummary, RpcError> {
        if !params.absolute_path.is_absolute() {
            return Err(RpcError::InvalidParams(format!(
                "path is not absolute: {}",
                params.absolute_path.display()
            )));
        }
        discovery
            .ensure_discovered()
            .await
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        let path = tokio::fs::canonicalize(&params.absolute_path)
            .await
            .unwrap_or(params.absolute_path);
        let index = store.index();
        let info = index
            .containing(&path)
            .ok_or_else(|| RpcError::WorktreeNotFound(path.display().to_string()))?;
        Ok(summarize(&git, info).await)
    }
}

/// `worktree_get_by_name`
pub struct WorktreeGetByName;

impl Method for WorktreeGetByName {
    const NAME: &'static str = "worktree_get_by_name";
    type Params = WorktreeGetByNameParams;
    type Deps = (SharedGit, Arc<Store>, Arc<DiscoveryService>);
    type Output = WorktreeSummary;

    async fn call(
        (git, store, discovery): Self::Deps,
        params: WorktreeGetByNameParams,
    ) -> Result<WorktreeSummary, RpcError> {
        discovery
            .ensure_discovered()
            .await
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        let index = store.index();
        let info = index
            .get_by_name(&params.name)
            .ok_or(RpcError::WorktreeNotFound(params.name))?;
        Ok(summarize(&git, info).await)
    }
}

pub struct CreateDeps {
    config: Arc<Config>,
    git: SharedGit,
    discovery: Arc<DiscoveryService>,
}

impl FromServices for CreateDeps {
    fn from_services(s: &Services) -> Self {
        Self {
            config: Arc::clone(&s.config),
            git: Arc::clone(&s.git),
            discovery: Arc::clone(&s.discovery),
        }
    }
}

/// `worktree_create`: checkout, hook, register. Streams progress.
pub struct WorktreeCreate;

impl StreamMethod for WorktreeCreate {
    const NAME: &'static str = "worktree_create";
    type Params = WorktreeCreateParams;
    type Deps = CreateDeps;
    type Output = WorktreeCreateResult;

    async fn call(
        deps: CreateDeps,
        params: WorktreeCreateParams,
        events: EventSink,
    ) -> Result<WorktreeCreateResult, RpcError> {
        let name = params.name;
        validate_name(&name)?;
        let branch = format!("{}{name}", deps.config.branch_prefix);
        let root = deps.discovery.worktrees_dir().to_path_buf();
        let path = root.join(&name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(RpcError::InvalidParams(format!(
                "worktree path already exists: {}",
                path.display()
            )));
        }

        info!(worktree = %name, branch, path = %path.display(), "Creating worktree");
        progress(&events, ProgressStep::CheckoutStarted, 0.0, "checking out");
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| RpcError::Internal(format!("cannot create {}: {e}", root.display())))?;
        let (add_path, add_branch, base) =
            (path.clone(), branch.clone(), deps.config.upstream_branch.clone());
        run_blocking(&deps.git, move |git| git.worktree_add(&add_path, &add_branch, &base)).await?;
        let path: PathBuf = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        progress(&events, ProgressStep::CheckoutDone, 0.5, "checked out");

        progress(&events, ProgressStep::HydrateStarted, 0.6, "running post-creation hook");
        let hook = match &deps.config.hooks.post_creation_script {
            Some(script) => Some(
                hooks::run_post_creation(script, &path, &name, deps.config.hook_timeout(), &events)
                    .await,
            ),
            None => None,
        };
        if let Some(error) = hook.as_ref().and_then(|h| h.error.as_deref()) {
            warn!(worktree = %name, error, "Post-creation hook did not succeed");
        }
        progress(&events, ProgressStep::HydrateDone, 1.0, "ready");

        let info = WorktreeInfo::from_path(&path, false);
        deps.discovery.register(info.clone()).await;
        info!(worktree = %name, "Worktree created");
        Ok(WorktreeCreateResult {
            wtid: info.id,
            name: info.name,
            absolute_path: info.path,
            branch,
            hook,
        })
    }
}

/// `worktree_delete`: remove a secondary worktree. The main checkout is refused.
pub struct WorktreeDelete;

impl Method for WorktreeDelete {
    const NAME: &'static str = "worktree_delete";
    type Params = WorktreeDeleteParams;
    type Deps = (SharedGit, Arc<Store>, Arc<DiscoveryService>);
    type Output = &'static str;

    async fn call(
        (git, store, discovery): Self::Deps,
        params: WorktreeDeleteParams,
    ) -> Result<&'static str, RpcError> {
        discovery
            .ensure_discovered()
            .await
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        let info = store
            .index()
            .get_by_id(&params.wtid)
            .cloned()
            .ok_or_else(|| RpcError::WorktreeNotFound(params.wtid.to_string()))?;
        if info.is_main {
            return Err(RpcError::InvalidParams(
                "the main worktree cannot be deleted".into(),
            ));
        }

        let (path, force) = (info.path.clone(), params.force);
        run_blocking(&git, move |git| git.worktree_remove(&path, force)).await?;
        discovery.unregister(&info.path).await;
        info!(worktree = %info.name, force, "Worktree deleted");
        Ok("ok")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wt_core::protocol::WorktreeId;

    use super::*;
    use crate::testing::{FakeGit, services, write_script};

    #[test]
    fn validate_name_accepts_plain_names() {
        assert!(validate_name("feat-login").is_ok());
        assert!(validate_name("v1.2.3").is_ok());
        assert!(validate_name("my_worktree").is_ok());
    }

    #[test]
    fn validate_name_rejects_escapes() {
        for bad in ["", "-flag", "..", "a/b", "foo/../bar", "foo bar", "x;y"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn create_registers_and_streams_progress() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let (events, mut rx) = EventSink::channel();

        let created = WorktreeCreate::call(
            CreateDeps::from_services(&services),
            WorktreeCreateParams { name: "feat".into() },
            events,
        )
        .await
        .unwrap();
        assert_eq!(created.wtid, WorktreeId::from_name("feat"));
        assert_eq!(created.branch, "feat");
        assert!(created.hook.is_none());
        assert!(services.store.index().get_by_name("feat").is_some());
        assert!(services.subsystems.supervisor(&created.absolute_path).is_some());

        let mut steps = Vec::new();
        while let Some(event) = rx.recv().await {
            steps.push(event["step"].as_str().unwrap().to_string());
        }
        assert_eq!(
            steps,
            ["checkout_started", "checkout_done", "hydrate_started", "hydrate_done"]
        );
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn create_runs_hook_and_rejects_duplicates() {
        let main = tempfile::tempdir().unwrap();
        let bin = tempfile::tempdir().unwrap();
        let services = {
            let base = services(main.path(), Arc::new(FakeGit::default()));
            let mut config = (*base.config).clone();
            config.branch_prefix = "dev/".into();
            config.hooks.post_creation_script =
                Some(write_script(bin.path(), "hook", r#"echo "setup $2""#));
            Arc::new(Services {
                config: Arc::new(config),
                git: Arc::clone(&base.git),
                store: Arc::clone(&base.store),
                discovery: Arc::clone(&base.discovery),
                subsystems: Arc::clone(&base.subsystems),
                refs: Arc::clone(&base.refs),
                github: Arc::clone(&base.github),
                control: Arc::clone(&base.control),
            })
        };
        let params = || WorktreeCreateParams { name: "hooked".into() };

        let created = WorktreeCreate::call(CreateDeps::from_services(&services), params(), EventSink::discard())
            .await
            .unwrap();
        assert_eq!(created.branch, "dev/hooked");
        let hook = created.hook.unwrap();
        assert_eq!(hook.exit_code, Some(0));
        assert_eq!(hook.stdout, "setup --worktree_name=hooked\n");

        let again = WorktreeCreate::call(CreateDeps::from_services(&services), params(), EventSink::discard()).await;
        assert!(matches!(again, Err(RpcError::InvalidParams(_))));
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn delete_refuses_main_and_unknown() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let deps = || <WorktreeDelete as Method>::Deps::from_services(&services);
        let main_id = services.store.index().iter().next().unwrap().id.clone();

        let err = WorktreeDelete::call(deps(), WorktreeDeleteParams { wtid: main_id, force: false })
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidParams(_)));

        let err = WorktreeDelete::call(
            deps(),
            WorktreeDeleteParams { wtid: WorktreeId::from_name("ghost"), force: true },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcError::WorktreeNotFound(_)));
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn delete_unregisters_created_worktree() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let created = WorktreeCreate::call(
            CreateDeps::from_services(&services),
            WorktreeCreateParams { name: "gone".into() },
            EventSink::discard(),
        )
        .await
        .unwrap();

        WorktreeDelete::call(
            <WorktreeDelete as Method>::Deps::from_services(&services),
            WorktreeDeleteParams { wtid: created.wtid.clone(), force: false },
        )
        .await
        .unwrap();
        assert!(services.store.index().get_by_id(&created.wtid).is_none());
        assert!(services.subsystems.supervisor(&created.absolute_path).is_none());
        assert!(!created.absolute_path.exists());
        services.subsystems.stop_all().await;
    }

    #[tokio::test]
    async fn identify_finds_containing_worktree() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let nested = main.path().join("src");
        std::fs::create_dir(&nested).unwrap();
        let deps = || <WorktreeIdentify as Method>::Deps::from_services(&services);

        let found = WorktreeIdentify::call(deps(), WorktreeIdentifyParams { absolute_path: nested })
            .await
            .unwrap();
        assert!(found.is_main);

        let err = WorktreeIdentify::call(
            deps(),
            WorktreeIdentifyParams { absolute_path: PathBuf::from("/definitely/elsewhere") },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RpcError::WorktreeNotFound(_)));
        services.subsystems.stop_all().await;
    }
}
