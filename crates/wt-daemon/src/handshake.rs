//! Startup handshake with the launching process.
//!
//! The launcher passes a pipe's write end and names it in
//! [`HANDSHAKE_FD_ENV`]. Each milestone is one JSON line; the channel is
//! closed after the final `ready` or failure line.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};
use wt_core::protocol::{HANDSHAKE_FD_ENV, StartupMessage};

/// The launcher's milestone channel, if one was passed.
pub struct Handshake {
    channel: Option<File>,
}

impl Handshake {
    /// A handshake that writes nothing.
    pub const fn none() -> Self {
        Self { channel: None }
    }

    /// Write milestones to `file`.
    pub fn from_file(file: File) -> Self {
        Self {
            channel: Some(file),
        }
    }

    /// Adopt the descriptor named by the environment, if any.
    #[cfg(unix)]
    pub fn from_env() -> Self {
        use std::os::fd::{FromRawFd, RawFd};

        let Ok(raw) = std::env::var(HANDSHAKE_FD_ENV) else {
            return Self::none();
        };
        let fd: RawFd = match raw.trim().parse() {
            Ok(fd) if fd > 2 => fd,
            _ => {
                warn!(value = %raw, "Ignoring invalid {HANDSHAKE_FD_ENV}");
                return Self::none();
            }
        };
        // SAFETY: fcntl(F_GETFD) only queries descriptor flags.
        #[allow(unsafe_code)]
        let open = unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1;
        if !open {
            warn!(fd, "Handshake descriptor is not open");
            return Self::none();
        }
        // SAFETY: the launcher handed this descriptor to us for our exclusive
        // use and nothing else in the process refers to it; it was checked to
        // be open above.
        #[allow(unsafe_code)]
        let file = unsafe { File::from_raw_fd(fd) };
        debug!(fd, "Adopted handshake descriptor");
        Self::from_file(file)
    }

    #[cfg(not(unix))]
    pub fn from_env() -> Self {
        Self::none()
    }

    pub const fn is_attached(&self) -> bool {
        self.channel.is_some()
    }

    /// Write one milestone line. A broken channel is dropped.
    pub fn send(&mut self, message: &StartupMessage) {
        let Some(channel) = self.channel.as_mut() else {
            return;
        };
        let written = serde_json::to_vec(message)
            .map_err(std::io::Error::other)
            .and_then(|mut line| {
                line.push(b'\n');
                channel.write_all(&line)?;
                channel.flush()
            });
        if let Err(e) = written {
            warn!(error = %e, "Handshake channel broken, launcher will not hear further milestones");
            self.channel = None;
        }
    }

    /// Send the final line and close the channel.
    pub fn finish(mut self, message: &StartupMessage) {
        self.send(message);
    }
}

/// Point stdout and stderr at `log_path`, appending.
#[cfg(unix)]
pub fn redirect_output(log_path: &Path) -> std::io::Result<()> {
    use std::os::fd::AsRawFd;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        // SAFETY: both descriptors are valid for the duration of the call;
        // dup2 atomically replaces `target`.
        #[allow(unsafe_code)]
        let ret = unsafe { libc::dup2(log.as_raw_fd(), target) };
        if ret == -1 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn redirect_output(_log_path: &Path) -> std::io::Result<()> {
    Ok(())
}
