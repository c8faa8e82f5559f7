//! gitstatusd integration: one helper process per worktree answering
//! dirty/untracked counts.

mod locate;
pub mod protocol;
mod supervisor;

pub use locate::{LocateError, locate};
pub use protocol::{ProtocolError, RepoState, RepoStatus, StatusReply};
pub use supervisor::{GitstatusdError, GitstatusdSnapshot, GitstatusdSupervisor, Lifecycle};

/// Reported when no helper binary could be found.
pub const UNAVAILABLE: &str = "gitstatusd unavailable";
