//! Post-creation hook runner.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wt_core::protocol::{HookOutputEvent, HookRunResult, OutputStream, StreamEvent};

use crate::rpc::EventSink;

/// Previews kept in the final result, in characters.
pub const PREVIEW_LIMIT: usize = 8192;

const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Failed to start hook {script}: {source}")]
    Spawn {
        script: String,
        source: std::io::Error,
    },

    #[error("Failed waiting for hook: {0}")]
    Wait(std::io::Error),
}

#[derive(Default)]
struct Captured {
    preview: String,
    streamed: bool,
}

fn truncate_chars(text: &mut String, limit: usize) {
    if let Some((idx, _)) = text.char_indices().nth(limit) {
        text.truncate(idx);
    }
}

/// Incremental UTF-8 decoding across read boundaries.
///
/// An incomplete sequence at the end of a chunk is held until the next one;
/// genuinely invalid bytes become U+FFFD.
#[derive(Default)]
struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest = self.pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }

    /// Whatever is still held once the stream ends.
    fn finish(self) -> String {
        String::from_utf8_lossy(&self.pending).into_owned()
    }
}

impl Captured {
    fn record(&mut self, chunk: String, stream: OutputStream, events: &EventSink) {
        if chunk.is_empty() {
            return;
        }
        // Bytes are an upper bound on chars, so this keeps enough for the preview.
        if self.preview.len() < PREVIEW_LIMIT * 4 {
            self.preview.push_str(&chunk);
        }
        let event = StreamEvent::HookOutput(HookOutputEvent {
            stream,
            output: chunk,
        });
        if events.emit(&event) {
            self.streamed = true;
        }
    }
}

async fn pump<R>(mut reader: R, stream: OutputStream, events: EventSink) -> Captured
where
    R: AsyncRead + Unpin,
{
    let mut captured = Captured::default();
    let mut decoder = Utf8Carry::default();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(?stream, error = %e, "Hook output read failed");
                break;
            }
        };
        let chunk = decoder.decode(&buf[..n]);
        captured.record(chunk, stream, &events);
    }
    captured.record(decoder.finish(), stream, &events);
    truncate_chars(&mut captured.preview, PREVIEW_LIMIT);
    captured
}

async fn collect(task: Option<JoinHandle<Captured>>) -> Captured {
    let Some(task) = task else {
        return Captured::default();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_GRACE, task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => Captured::default(),
        Err(_) => {
            abort.abort();
            Captured::default()
        }
    }
}

/// Run `script` for a freshly created worktree.
///
/// Always yields a result; failures are reported in its `error` field.
pub async fn run_post_creation(
    script: &Path,
    worktree: &Path,
    name: &str,
    timeout: Duration,
    events: &EventSink,
) -> HookRunResult {
    match run(script, worktree, name, timeout, events).await {
        Ok(result) => result,
        Err(e) => {
            warn!(script = %script.display(), error = %e, "Post-creation hook failed");
            HookRunResult {
                error: Some(e.to_string()),
                ..HookRunResult::default()
            }
        }
    }
}

async fn run(
    script: &Path,
    worktree: &Path,
    name: &str,
    timeout: Duration,
    events: &EventSink,
) -> Result<HookRunResult, HookError> {
    info!(script = %script.display(), worktree = %worktree.display(), "Running post-creation hook");

    let mut command = Command::new(script);
    command
        .arg(format!("--worktree_root={}", worktree.display()))
        .arg(format!("--worktree_name={name}"))
        .current_dir(worktree)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|source| HookError::Spawn {
        script: script.display().to_string(),
        source,
    })?;
    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(pump(out, OutputStream::Stdout, events.clone())));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(pump(err, OutputStream::Stderr, events.clone())));

    let mut result = HookRunResult {
        ran: true,
        ..HookRunResult::default()
    };
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            result.exit_code = status.code();
            if !status.success() {
                result.error = Some(format!("hook exited with {status}"));
            }
        }
        Ok(Err(e)) => return Err(HookError::Wait(e)),
        Err(_) => {
            warn!(script = %script.display(), timeout_secs = timeout.as_secs(), "Hook timed out, killing its process group");
            #[cfg(unix)]
            if let Some(pid) = child.id() {
                if let Err(e) = crate::process::kill_group(pid) {
                    warn!(pid, error = %e, "Failed to kill hook process group");
                }
            }
            child.kill().await.ok();
            result.error = Some("timeout".to_string());
            result.timeout_secs = Some(timeout.as_secs());
        }
    }

    let out = collect(stdout).await;
    let err = collect(stderr).await;
    result.stdout = out.preview;
    result.stderr = err.preview;
    result.streamed = out.streamed || err.streamed;

    info!(
        script = %script.display(),
        exit_code = ?result.exit_code,
        error = ?result.error,
        "Post-creation hook finished"
    );
    Ok(result)
}
