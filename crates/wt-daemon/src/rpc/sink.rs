use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use wt_core::protocol::StreamEvent;

/// Emitter for intermediate event lines of a streaming method.
///
/// Clones share one channel; the connection writes whatever arrives ahead of
/// the final response.
#[derive(Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<Value>>,
}

impl EventSink {
    /// A live sink and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub const fn discard() -> Self {
        Self { tx: None }
    }

    /// Whether anyone is listening.
    pub fn is_live(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Send one event. Returns whether a reader was still listening.
    pub fn emit(&self, event: &StreamEvent) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        match serde_json::to_value(event) {
            Ok(value) => tx.send(value).is_ok(),
            Err(e) => {
                warn!(error = %e, "Dropping unserializable event");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use wt_core::protocol::{HookOutputEvent, OutputStream};

    use super::*;

    fn line() -> StreamEvent {
        StreamEvent::HookOutput(HookOutputEvent {
            stream: OutputStream::Stdout,
            output: "hi\n".into(),
        })
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.emit(&line()));
        assert!(sink.clone().emit(&line()));
        drop(sink);
        assert_eq!(rx.recv().await.unwrap()["event"], "hook_output");
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn discard_and_closed_sinks_report_no_reader() {
        assert!(!EventSink::discard().emit(&line()));
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(!sink.is_live());
        assert!(!sink.emit(&line()));
    }
}
