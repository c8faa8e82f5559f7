//! Intermediate event lines written by streaming methods before the final
//! response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Progress(ProgressEvent),
    HookOutput(HookOutputEvent),
}

impl StreamEvent {
    /// Event lines carry an `event` key; the final response never does.
    pub fn is_event_line(value: &serde_json::Value) -> bool {
        value.get("event").is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub operation: Operation,
    pub step: ProgressStep,
    /// Fraction of the operation done, `0.0..=1.0`.
    #[serde(default)]
    pub progress: Option<f32>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Progress event with no message; `progress` is in `0.0..=1.0`.
    pub const fn new(operation: Operation, step: ProgressStep, progress: f32) -> Self {
        Self {
            operation,
            step,
            progress: Some(progress),
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    WorktreeCreate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    CheckoutStarted,
    CheckoutDone,
    HydrateStarted,
    HydrateDone,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutputEvent {
    pub stream: OutputStream,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn progress_line_shape() {
        let event = StreamEvent::Progress(ProgressEvent::new(
            Operation::WorktreeCreate,
            ProgressStep::CheckoutStarted,
            0.0,
        ));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "progress");
        assert_eq!(value["operation"], "worktree_create");
        assert_eq!(value["step"], "checkout_started");
        assert!(StreamEvent::is_event_line(&value));
    }

    #[test]
    fn hook_output_line_shape() {
        let event = StreamEvent::HookOutput(HookOutputEvent {
            stream: OutputStream::Stderr,
            output: "warning\n".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "hook_output", "stream": "stderr", "output": "warning\n"})
        );
    }
}
