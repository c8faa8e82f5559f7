//! Wire types exchanged over the daemon's Unix socket.
//!
//! One newline-delimited JSON [`Request`] per connection, answered by zero or
//! more [`StreamEvent`] lines and exactly one final [`Response`] line.

mod envelope;
mod events;
mod handshake;
mod status;
mod worktree;

pub use envelope::{ErrorCode, ErrorObject, Request, Response, ResponseBody};
pub use events::{HookOutputEvent, Operation, OutputStream, ProgressEvent, ProgressStep, StreamEvent};
pub use handshake::{HANDSHAKE_FD_ENV, PROTOCOL_VERSION, StartupMessage, StartupPhase};
pub use status::{
    AheadBehind, CommitInfo, ComponentState, ComponentStatus, DaemonHealth, GitstatusdState,
    HealthStatus, PrData, PrInfo, PrState, ReadinessSummary, StatusItem, StatusItemResult,
    StatusParams, StatusResponse, StatusResult,
};
pub use worktree::{
    HookRunResult, NoParams, PingResult, WorktreeCreateParams, WorktreeCreateResult,
    WorktreeDeleteParams, WorktreeGetByNameParams, WorktreeId, WorktreeIdentifyParams,
    WorktreeListResult, WorktreeSummary,
};
