use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tracing::debug;
use uuid::Uuid;
use wt_core::protocol::{ErrorCode, ErrorObject, Request, Response};

use super::MAX_REQUEST_BYTES;
use crate::rpc::{EventSink, RpcRegistry};

/// Decode one request line, or the error response to send instead.
pub(super) fn parse_request(line: &str) -> Result<Request, Response> {
    let value: Value = serde_json::from_str(line.trim()).map_err(|e| {
        Response::failure(
            Uuid::nil(),
            ErrorObject::new(ErrorCode::ParseError, format!("Parse error: {e}")),
        )
    })?;
    let id = value
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::nil);
    serde_json::from_value(value).map_err(|e| {
        Response::failure(
            id,
            ErrorObject::new(ErrorCode::InvalidRequest, format!("Invalid request: {e}")),
        )
    })
}

/// Writes lines until the peer goes away, then silently drops the rest.
struct LineWriter {
    inner: OwnedWriteHalf,
    open: bool,
}

impl LineWriter {
    async fn send<T: Serialize>(&mut self, value: &T) {
        if !self.open {
            return;
        }
        let mut buf = match serde_json::to_vec(value) {
            Ok(buf) => buf,
            Err(e) => {
                debug!(error = %e, "Cannot serialize line");
                return;
            }
        };
        buf.push(b'\n');
        if let Err(e) = self.inner.write_all(&buf).await {
            debug!(error = %e, "Client went away");
            self.open = false;
        }
    }

    async fn close(mut self) {
        if self.open {
            self.inner.shutdown().await.ok();
        }
    }
}

pub(super) async fn handle(stream: UnixStream, registry: Arc<RpcRegistry>) {
    let (read, write) = stream.into_split();
    let mut writer = LineWriter {
        inner: write,
        open: true,
    };
    let mut reader = BufReader::new(read).take(MAX_REQUEST_BYTES);
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => return,
        Ok(_) => {}
        Err(e) => {
            debug!(error = %e, "Failed to read request");
            return;
        }
    }

    let request = match parse_request(&line) {
        Ok(request) => request,
        Err(response) => {
            writer.send(&response).await;
            writer.close().await;
            return;
        }
    };

    // The handler runs detached inside dispatch, so it completes even if
    // the client disconnects mid-stream.
    let (events, mut pending) = EventSink::channel();
    let dispatch = registry.dispatch(request, events);
    tokio::pin!(dispatch);
    let response = loop {
        tokio::select! {
            biased;
            Some(event) = pending.recv() => writer.send(&event).await,
            response = &mut dispatch => break response,
        }
    };
    while let Ok(event) = pending.try_recv() {
        writer.send(&event).await;
    }
    writer.send(&response).await;
    writer.close().await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn valid_line_parses() {
        let req = parse_request("{\"method\":\"ping\",\"params\":null,\"id\":\"6f1c2a8e-0b7d-4d0e-9a69-0a4e5b0c9f11\"}\n")
            .unwrap();
        assert_eq!(req.method, "ping");
    }

    #[test]
    fn bad_id_is_invalid_request() {
        let err = parse_request(r#"{"method": "ping", "id": "not-a-uuid"}"#).unwrap_err();
        assert_eq!(err.error().unwrap().code, -32600);
        assert_eq!(err.id, Uuid::nil());
    }
}
