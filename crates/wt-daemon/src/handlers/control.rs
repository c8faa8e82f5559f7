use std::sync::Arc;

use tracing::info;
use wt_core::protocol::{NoParams, PingResult};

use crate::github::GitHubWatcher;
use crate::rpc::{DaemonControl, Method, RpcError};
use crate::store::Store;

/// `ping`: liveness plus process identity.
pub struct Ping;

impl Method for Ping {
    const NAME: &'static str = "ping";
    type Params = NoParams;
    type Deps = (Arc<DaemonControl>, Arc<Store>);
    type Output = PingResult;

    async fn call((control, store): Self::Deps, _: NoParams) -> Result<PingResult, RpcError> {
        Ok(PingResult {
            message: "pong".to_string(),
            daemon_pid: control.pid(),
            started_at: control.started_at(),
            discovered_worktrees: store.index().len(),
        })
    }
}

/// `shutdown`: acknowledge, then stop the daemon.
pub struct Shutdown;

impl Method for Shutdown {
    const NAME: &'static str = "shutdown";
    type Params = NoParams;
    type Deps = Arc<DaemonControl>;
    type Output = &'static str;

    async fn call(control: Arc<DaemonControl>, _: NoParams) -> Result<&'static str, RpcError> {
        info!("Shutdown requested over RPC");
        control.request_shutdown();
        Ok("ok")
    }
}

/// Synchronous full PR refresh. Extra scoping keys are accepted and ignored.
pub struct PrRefreshNow;

impl Method for PrRefreshNow {
    const NAME: &'static str = "pr_refresh_now";
    type Params = NoParams;
    type Deps = Arc<GitHubWatcher>;
    type Output = &'static str;

    async fn call(github: Arc<GitHubWatcher>, _: NoParams) -> Result<&'static str, RpcError> {
        github.refresh_now().await;
        Ok("ok")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::rpc::FromServices;
    use crate::testing::{FakeGit, services};

    #[tokio::test]
    async fn ping_reports_pid_and_worktrees() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let pong = Ping::call(FromServices::from_services(&services), NoParams {})
            .await
            .unwrap();
        assert_eq!(pong.message, "pong");
        assert_eq!(pong.daemon_pid, std::process::id());
        assert_eq!(pong.discovered_worktrees, 1);
    }

    #[tokio::test]
    async fn shutdown_flips_the_control_flag() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let rx = services.control.shutdown_requested();
        assert_eq!(
            Shutdown::call(Arc::clone(&services.control), NoParams {}).await.unwrap(),
            "ok"
        );
        assert!(*rx.borrow());
    }

    #[tokio::test]
    async fn refresh_on_disabled_github_is_ok() {
        let main = tempfile::tempdir().unwrap();
        let services = services(main.path(), Arc::new(FakeGit::default()));
        let out = PrRefreshNow::call(Arc::clone(&services.github), NoParams {})
            .await
            .unwrap();
        assert_eq!(out, "ok");
    }
}
