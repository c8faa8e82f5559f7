//! Child process termination helpers.

use std::time::Duration;

use tokio::process::Child;
use tracing::{info, warn};

/// Send `signal` to one process.
#[cfg(unix)]
fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: pid comes from a Child we spawned and still own; kill(2) has no
    // memory-safety preconditions.
    #[allow(unsafe_code)]
    #[allow(clippy::cast_possible_wrap)]
    let ret = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Kill every process in the group led by `pgid`.
#[cfg(unix)]
pub fn kill_group(pgid: u32) -> std::io::Result<()> {
    // SAFETY: pgid is the pid of a child spawned with process_group(0), so it
    // names a group we created; killpg(2) has no memory-safety preconditions.
    #[allow(unsafe_code)]
    #[allow(clippy::cast_possible_wrap)]
    let ret = unsafe { libc::killpg(pgid as libc::pid_t, libc::SIGKILL) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
pub async fn terminate(child: &mut Child, grace: Duration, label: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            if let Err(e) = send_signal(pid, libc::SIGTERM) {
                warn!(process = label, pid, error = %e, "Failed to send SIGTERM");
            }
        }
    }
    #[cfg(not(unix))]
    {
        child.start_kill().ok();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(process = label, ?status, "Process exited");
        }
        Ok(Err(e)) => {
            warn!(process = label, error = %e, "Error waiting for process");
            child.kill().await.ok();
        }
        Err(_) => {
            warn!(process = label, "Timeout waiting for graceful shutdown, killing");
            child.kill().await.ok();
        }
    }
}
