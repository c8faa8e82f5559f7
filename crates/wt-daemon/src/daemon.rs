//! Daemon assembly: startup milestones, the serve loop, ordered shutdown.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::RecursiveMode;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};
use wt_core::Config;
use wt_core::protocol::{StartupMessage, StartupPhase};

use crate::discovery::DiscoveryService;
use crate::git::{GitCli, SharedGit, run_blocking};
use crate::github::GitHubWatcher;
use crate::gitstatusd;
use crate::handlers;
use crate::handshake::Handshake;
use crate::registry::Registry;
use crate::rpc::{DaemonControl, Services};
use crate::server::{RpcServer, ServerError, socket_is_live};
use crate::store::Store;
use crate::subsystems::WorktreeSubsystems;
use crate::watch::{Debouncer, GitRefsWatcher, PathWatcher};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] wt_core::Error),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Initial discovery failed: {0}")]
    Discovery(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Re-runs discovery shortly after the worktrees directory changes.
struct DirWatcher {
    fs: PathWatcher,
    debouncer: Debouncer,
}

impl DirWatcher {
    fn start(discovery: &Arc<DiscoveryService>, window: std::time::Duration) -> Option<Self> {
        let dir = discovery.worktrees_dir().to_path_buf();
        if !dir.is_dir() {
            info!(dir = %dir.display(), "Worktrees directory missing, relying on periodic discovery");
            return None;
        }
        let discovery = Arc::clone(discovery);
        let debouncer = Debouncer::spawn("worktrees-dir", window, move || {
            let discovery = Arc::clone(&discovery);
            async move {
                if let Err(e) = discovery.run_once().await {
                    warn!(error = %e, "Discovery after directory change failed");
                }
            }
        });
        match PathWatcher::watch(&dir, RecursiveMode::NonRecursive, debouncer.handle()) {
            Ok(fs) => Some(Self { fs, debouncer }),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot watch worktrees directory");
                None
            }
        }
    }

    async fn stop(self) {
        drop(self.fs);
        self.debouncer.stop().await;
    }
}

/// A started daemon: every subsystem running and the socket bound.
pub struct Daemon {
    services: Arc<Services>,
    server: RpcServer,
    dir_watcher: Option<DirWatcher>,
    socket_path: PathBuf,
    pid_path: PathBuf,
}

fn fail(handshake: Handshake, phase: StartupPhase, error: DaemonError) -> DaemonError {
    warn!(?phase, error = %error, "Daemon startup failed");
    handshake.finish(&StartupMessage::failure(phase, error.to_string()));
    error
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

impl Daemon {
    /// Bring every subsystem up and bind the socket, reporting each phase on
    /// `handshake`. The handshake is closed when this returns.
    ///
    /// `git` overrides the porcelain, which otherwise shells out to `git`.
    pub async fn start(
        config: Config,
        git: Option<SharedGit>,
        mut handshake: Handshake,
    ) -> Result<Self, DaemonError> {
        handshake.send(&StartupMessage::progress(StartupPhase::Starting));

        if let Err(e) = config.validate() {
            return Err(fail(handshake, StartupPhase::Starting, e.into()));
        }
        let socket_path = config.socket_path();
        if socket_is_live(&socket_path) {
            let e: DaemonError = ServerError::AlreadyRunning(socket_path).into();
            return Err(fail(handshake, StartupPhase::Starting, e));
        }

        let binary = match gitstatusd::locate(config.gitstatusd.path.as_deref()).await {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "gitstatusd unavailable, working-tree counts disabled");
                None
            }
        };

        let config = Arc::new(config);
        let git = git.unwrap_or_else(|| Arc::new(GitCli::new(config.main_repo.clone())));
        let git_dir = run_blocking(&git, |git| git.common_git_dir())
            .await
            .inspect_err(|e| warn!(error = %e, "Cannot resolve the shared git directory"))
            .ok();
        let store = Arc::new(Store::new(Registry::new(&config.main_repo).index()));
        let ignored = std::iter::once(config.wt_dir()).chain(git_dir.clone()).collect();
        let subsystems = Arc::new(
            WorktreeSubsystems::new(binary.clone(), config.fs_debounce()).with_ignored(ignored),
        );
        let discovery = DiscoveryService::new(
            &config.main_repo,
            config.worktrees_dir(),
            Arc::clone(&store),
            Arc::clone(&subsystems),
        );

        handshake.send(&StartupMessage::progress(StartupPhase::Discovering));
        if let Err(e) = discovery.run_once().await {
            subsystems.stop_all().await;
            return Err(fail(handshake, StartupPhase::Discovering, DaemonError::Discovery(e.to_string())));
        }
        let discovered = store.index().len();
        info!(discovered, "Initial discovery complete");

        handshake.send(
            &StartupMessage::progress(StartupPhase::WarmingUp)
                .with_discovered(discovered)
                .with_gitstatusd_path(binary.clone()),
        );
        let refs = GitRefsWatcher::new(Arc::clone(&git), Arc::clone(&store), config.upstream_branch.clone());
        refs.start(git_dir.as_deref(), config.refs_debounce()).await;

        let github = GitHubWatcher::from_config(&config, Arc::clone(&store)).unwrap_or_else(|e| {
            warn!(error = %e, "GitHub integration disabled");
            GitHubWatcher::disabled(Arc::clone(&store))
        });
        github.start(config.github_refresh_interval());
        discovery.start(config.discovery_interval());
        let dir_watcher = DirWatcher::start(&discovery, config.fs_debounce());

        let services = Arc::new(Services {
            config: Arc::clone(&config),
            git,
            store,
            discovery,
            subsystems,
            refs,
            github,
            control: Arc::new(DaemonControl::new()),
        });
        let daemon = Self::bind(services, dir_watcher, &config);
        let daemon = match daemon {
            Ok(daemon) => daemon,
            Err((e, services, dir_watcher)) => {
                Self::teardown(&services, dir_watcher).await;
                return Err(fail(handshake, StartupPhase::WarmingUp, e));
            }
        };

        handshake.finish(
            &StartupMessage::ready(daemon.socket_path.clone())
                .with_discovered(discovered)
                .with_gitstatusd_path(binary),
        );
        info!(socket = %daemon.socket_path.display(), pid = daemon.services.control.pid(), "Daemon ready");
        Ok(daemon)
    }

    #[allow(clippy::type_complexity)]
    fn bind(
        services: Arc<Services>,
        dir_watcher: Option<DirWatcher>,
        config: &Config,
    ) -> Result<Self, (DaemonError, Arc<Services>, Option<DirWatcher>)> {
        let registry = Arc::new(handlers::registry(Arc::clone(&services)));
        let server = match RpcServer::bind(config.socket_path(), registry) {
            Ok(server) => server,
            Err(e) => return Err((e.into(), services, dir_watcher)),
        };
        let pid_path = config.pid_path();
        if let Err(e) = std::fs::write(&pid_path, format!("{}\n", services.control.pid())) {
            remove_if_present(server.path());
            return Err((e.into(), services, dir_watcher));
        }
        Ok(Self {
            socket_path: server.path().to_path_buf(),
            services,
            server,
            dir_watcher,
            pid_path,
        })
    }

    /// The bound RPC socket.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Services shared with every handler.
    pub const fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Serve until `signal` resolves or a `shutdown` request arrives, then
    /// stop everything in dependency order.
    pub async fn run(self, signal: impl Future<Output = ()>) {
        let Self {
            services,
            server,
            dir_watcher,
            socket_path,
            pid_path,
        } = self;

        let (stop_server, server_stopped) = watch::channel(false);
        let serving = tokio::spawn(server.serve(server_stopped));

        tokio::select! {
            () = signal => info!("Shutdown signal received"),
            () = wait_for_request(services.control.shutdown_requested()) => info!("Shutdown requested"),
        }

        Self::teardown(&services, dir_watcher).await;
        stop_server.send_replace(true);
        if let Err(e) = serving.await {
            warn!(error = %e, "Server task ended abnormally");
        }
        remove_if_present(&socket_path);
        remove_if_present(&pid_path);
        info!("Daemon stopped");
    }

    async fn teardown(services: &Services, dir_watcher: Option<DirWatcher>) {
        if let Some(watcher) = dir_watcher {
            watcher.stop().await;
        }
        // Discovery starts subsystems, so it goes before them.
        services.discovery.stop().await;
        services.subsystems.stop_all().await;
        services.github.stop().await;
        services.refs.stop().await;
    }
}

async fn wait_for_request(mut requested: watch::Receiver<bool>) {
    loop {
        if *requested.borrow_and_update() {
            return;
        }
        if requested.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
