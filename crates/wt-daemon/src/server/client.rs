//! Minimal client for the daemon socket.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use wt_core::protocol::{Request, Response, StreamEvent};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Daemon closed the connection without a response")]
    NoResponse,
}

/// Write `line` verbatim and read every line until the daemon closes.
pub async fn send_line(socket: &Path, line: &str) -> Result<Vec<Value>, ClientError> {
    let stream = UnixStream::connect(socket).await?;
    let (read, mut write) = stream.into_split();
    write.write_all(line.as_bytes()).await?;
    write.write_all(b"\n").await?;
    write.flush().await?;

    let mut lines = BufReader::new(read).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            out.push(serde_json::from_str(&line)?);
        }
    }
    Ok(out)
}

/// Call `method` and split the reply into event lines and the final response.
pub async fn call(
    socket: &Path,
    method: &str,
    params: Value,
) -> Result<(Vec<Value>, Response), ClientError> {
    let request = Request::new(method, params);
    let mut lines = send_line(socket, &serde_json::to_string(&request)?).await?;
    let last = lines.pop().ok_or(ClientError::NoResponse)?;
    if StreamEvent::is_event_line(&last) {
        return Err(ClientError::NoResponse);
    }
    Ok((lines, serde_json::from_value(last)?))
}
