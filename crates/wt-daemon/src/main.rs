//! `wt` Daemon
//!
//! Serves worktree status for one repository over a Unix socket.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use wt_core::config::load_config;
use wt_core::tracing_init::{default_filter, init_tracing};
use wt_daemon::Daemon;
use wt_daemon::handshake::{Handshake, redirect_output};

#[derive(Parser, Debug)]
#[command(name = "wt-daemon")]
#[command(version, about = "wt daemon - worktree status cache and RPC socket")]
struct Args {
    /// Main repository checkout (defaults to the current directory)
    #[arg(long, env = "WT_MAIN_REPO")]
    main_repo: Option<PathBuf>,

    /// Directory whose children are the secondary worktrees
    #[arg(long, env = "WT_WORKTREES_DIR")]
    worktrees_dir: Option<PathBuf>,

    /// Branch ahead/behind counts are measured against
    #[arg(long, env = "WT_UPSTREAM_BRANCH")]
    upstream_branch: Option<String>,

    /// Path to the gitstatusd binary (searched on PATH otherwise)
    #[arg(long, env = "WT_GITSTATUSD_PATH")]
    gitstatusd_path: Option<PathBuf>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, env = "WT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "WT_LOG_JSON")]
    log_json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let main_repo = match args.main_repo {
        Some(path) => path,
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };
    let mut config = load_config(Some(&main_repo))?;
    if let Some(dir) = args.worktrees_dir {
        config.worktrees_dir = Some(dir);
    }
    if let Some(branch) = args.upstream_branch {
        config.upstream_branch = branch;
    }
    if let Some(path) = args.gitstatusd_path {
        config.gitstatusd.path = Some(path);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    init_tracing(&default_filter("wt-daemon", &config.log_level), args.log_json);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        main_repo = %config.main_repo.display(),
        "Starting wt-daemon"
    );

    let handshake = Handshake::from_env();
    let detached = handshake.is_attached();
    let log_path = config.log_path();
    let daemon = Daemon::start(config, None, handshake).await?;
    if detached {
        if let Err(e) = redirect_output(&log_path) {
            warn!(path = %log_path.display(), error = %e, "Cannot redirect output to log file");
        }
    }

    daemon.run(shutdown_signal()).await;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            info!("Received Ctrl+C");
        }
        () = terminate => info!("Received SIGTERM"),
    }
}
