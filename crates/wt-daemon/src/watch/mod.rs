//! Filesystem-driven refresh: debounce, notify watches, and the two watchers
//! built from them.

mod debounce;
mod path_watcher;
mod refs;
mod worktree;

pub use debounce::{DebounceHandle, Debouncer};
pub use path_watcher::{PathFilter, PathWatcher};
pub use refs::{AheadBehindMap, GitRefsWatcher, compute_ahead_behind};
pub use worktree::{WorktreeWatcher, worktree_filter};
