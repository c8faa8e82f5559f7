use std::path::Path;

use tracing::{debug, warn};

use super::WorktreeInfo;

/// Immediate subdirectories of `root` that contain repository metadata.
///
/// A missing root yields an empty set. Unreadable entries are logged and
/// skipped so one bad directory never hides the rest.
pub fn scan(root: &Path) -> Vec<WorktreeInfo> {
    let root = match root.canonicalize() {
        Ok(root) => root,
        Err(e) => {
            debug!(root = %root.display(), error = %e, "Worktrees directory not readable");
            return Vec::new();
        }
    };
    let entries = match std::fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "Failed to list worktrees directory");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => {}
            Ok(_) => continue,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping entry with unknown type");
                continue;
            }
        }
        // A linked worktree has a `.git` file, a clone has a directory.
        if path.join(".git").exists() {
            found.push(WorktreeInfo::from_path(path, false));
        } else {
            debug!(path = %path.display(), "Not a worktree, skipping");
        }
    }
    found.sort_by(|a, b| a.path.cmp(&b.path));
    found
}
