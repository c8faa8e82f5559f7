//! Finding a usable gitstatusd binary.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const BINARY_NAME: &str = "gitstatusd";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum LocateError {
    #[error("gitstatusd at {path} failed its version probe: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("gitstatusd not found on PATH")]
    NotFound,
}

/// Resolve the helper binary from `configured`, or else from `PATH`.
///
/// Every candidate must answer `--version` within two seconds.
pub async fn locate(configured: Option<&Path>) -> Result<PathBuf, LocateError> {
    if let Some(path) = configured {
        let version = probe(path).await.map_err(|reason| LocateError::Probe {
            path: path.to_path_buf(),
            reason,
        })?;
        info!(path = %path.display(), version = %version, "Using configured gitstatusd");
        return Ok(path.to_path_buf());
    }

    let Some(search) = std::env::var_os("PATH") else {
        return Err(LocateError::NotFound);
    };
    for dir in std::env::split_paths(&search) {
        let candidate = dir.join(BINARY_NAME);
        if !candidate.is_file() {
            continue;
        }
        match probe(&candidate).await {
            Ok(version) => {
                info!(path = %candidate.display(), version = %version, "Found gitstatusd on PATH");
                return Ok(candidate);
            }
            Err(reason) => {
                debug!(path = %candidate.display(), reason, "Skipping gitstatusd candidate");
            }
        }
    }
    Err(LocateError::NotFound)
}

async fn probe(path: &Path) -> Result<String, String> {
    let child = Command::new(path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| e.to_string())?;
    let output = tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| "timed out".to_string())?
        .map_err(|e| e.to_string())?;
    if !output.status.success() {
        return Err(format!("exited with {}", output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::write_script;

    #[tokio::test]
    async fn configured_binary_must_answer_version() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_script(dir.path(), "good", "echo v1.5.4");
        assert_eq!(locate(Some(&good)).await.unwrap(), good);

        let bad = write_script(dir.path(), "bad", "exit 3");
        assert!(matches!(
            locate(Some(&bad)).await,
            Err(LocateError::Probe { .. })
        ));
    }

    #[tokio::test]
    async fn missing_configured_binary_is_probe_error() {
        let err = locate(Some(Path::new("/no/such/gitstatusd"))).await.unwrap_err();
        assert!(err.to_string().contains("/no/such/gitstatusd"));
    }
}
