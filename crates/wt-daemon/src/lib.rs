//! `wt` Daemon Library
//!
//! Background service for a repository's worktrees:
//! - Discovery of worktrees and their per-worktree gitstatusd supervisors
//! - Debounced filesystem and git-refs watchers feeding status caches
//! - Pull request state from GitHub, recomputed when the branch set changes
//! - The newline-delimited JSON RPC socket that serves it all

pub mod collector;
pub mod daemon;
pub mod discovery;
pub mod git;
pub mod github;
pub mod gitstatusd;
pub mod handlers;
pub mod handshake;
pub mod hooks;
pub mod process;
pub mod reactive;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod store;
pub mod subsystems;
mod task;
pub mod watch;

#[cfg(test)]
mod testing;

pub use daemon::{Daemon, DaemonError};
