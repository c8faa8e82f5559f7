use std::collections::HashMap;
use std::path::{Path, PathBuf};

use wt_core::protocol::WorktreeId;

use super::WorktreeInfo;

/// Immutable lookup snapshot over the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    entries: Vec<WorktreeInfo>,
    by_path: HashMap<PathBuf, usize>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<WorktreeId, usize>,
}

impl Index {
    pub(super) fn build(entries: Vec<WorktreeInfo>) -> Self {
        let mut by_path = HashMap::with_capacity(entries.len());
        let mut by_name = HashMap::with_capacity(entries.len());
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, info) in entries.iter().enumerate() {
            by_path.insert(info.path.clone(), i);
            // First entry wins so the main checkout keeps its name.
            by_name.entry(info.name.clone()).or_insert(i);
            by_id.entry(info.id.clone()).or_insert(i);
        }
        Self {
            entries,
            by_path,
            by_name,
            by_id,
        }
    }

    /// Lookup by canonical root path.
    pub fn get_by_path(&self, path: &Path) -> Option<&WorktreeInfo> {
        self.by_path.get(path).map(|&i| &self.entries[i])
    }

    /// Lookup by worktree name.
    pub fn get_by_name(&self, name: &str) -> Option<&WorktreeInfo> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Lookup by wire id.
    pub fn get_by_id(&self, id: &WorktreeId) -> Option<&WorktreeInfo> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    /// The worktree whose directory contains `path`, preferring the deepest.
    pub fn containing(&self, path: &Path) -> Option<&WorktreeInfo> {
        self.entries
            .iter()
            .filter(|info| path.starts_with(&info.path))
            .max_by_key(|info| info.path.components().count())
    }

    /// Every worktree, ordered by path.
    pub fn iter(&self) -> impl Iterator<Item = &WorktreeInfo> {
        self.entries.iter()
    }

    /// Every worktree root, ordered.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|info| info.path.clone()).collect()
    }

    /// Number of worktrees, main included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
