//! Background tasks whose outcome is always logged.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Spawn `fut` and log how it ended: error, panic, or success at debug.
pub fn spawn_logged<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => debug!(task = name, "Background task finished"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
            Err(e) if e.is_panic() => error!(task = name, error = %e, "Background task panicked"),
            Err(_) => debug!(task = name, "Background task cancelled"),
        }
    })
}
