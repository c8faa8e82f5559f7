//! Unix socket server: one newline-delimited JSON request per connection.

pub mod client;
mod connection;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::rpc::RpcRegistry;

/// Longest request line accepted.
pub const MAX_REQUEST_BYTES: u64 = 1 << 20;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another daemon is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),
}

/// Whether something accepts connections at `path`.
pub fn socket_is_live(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

/// A bound socket, ready to [`serve`](Self::serve).
pub struct RpcServer {
    listener: UnixListener,
    path: PathBuf,
    registry: Arc<RpcRegistry>,
}

impl RpcServer {
    /// Bind `path`, replacing a stale socket file but never a live one.
    pub fn bind(path: PathBuf, registry: Arc<RpcRegistry>) -> Result<Self, ServerError> {
        if path.exists() {
            if socket_is_live(&path) {
                return Err(ServerError::AlreadyRunning(path));
            }
            warn!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "Listening on Unix socket");
        Ok(Self {
            listener,
            path,
            registry,
        })
    }

    /// Where the socket is bound.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` turns true, then close the
    /// listener and give open connections a moment to finish.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        connections.spawn(connection::handle(stream, Arc::clone(&self.registry)));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
            }
        }
        drop(self.listener);

        let open = connections.len();
        if open > 0 {
            info!(open, "Waiting for open connections");
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while connections.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Connections still open after drain timeout, aborting");
                connections.abort_all();
            }
        }
        info!(path = %self.path.display(), "Server stopped");
    }
}
