//! Worktree registry: the single source of truth for which worktrees exist.
//!
//! Discovery feeds [`Registry::apply`] with each fresh [`scan`]; worktree
//! create/delete go through [`Registry::register`] / [`Registry::unregister`].
//! Readers never touch the registry directly, they get an [`Index`] snapshot.

mod index;
mod scan;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use wt_core::protocol::{WorktreeId, WorktreeSummary};

pub use index::Index;
pub use scan::scan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub name: String,
    pub id: WorktreeId,
    pub exists: bool,
    pub is_main: bool,
}

impl WorktreeInfo {
    /// Build an entry whose name is the directory's final component.
    pub fn from_path(path: impl Into<PathBuf>, is_main: bool) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy().into_owned(), |n| n.to_string_lossy().into_owned());
        let exists = path.is_dir();
        Self {
            id: WorktreeId::from_name(&name),
            name,
            path,
            exists,
            is_main,
        }
    }

    /// Wire summary, with `branch` as resolved by the caller.
    pub fn summary(&self, branch: Option<String>) -> WorktreeSummary {
        WorktreeSummary {
            wtid: self.id.clone(),
            name: self.name.clone(),
            absolute_path: self.path.clone(),
            branch,
            exists: self.exists,
            is_main: self.is_main,
        }
    }
}

/// Delta produced by [`Registry::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    pub added: Vec<WorktreeInfo>,
    pub removed: Vec<WorktreeInfo>,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Known worktrees keyed by path. The main checkout is always present.
#[derive(Debug, Clone)]
pub struct Registry {
    main: WorktreeInfo,
    known: BTreeMap<PathBuf, WorktreeInfo>,
}

impl Registry {
    /// A registry holding only the main checkout.
    pub fn new(main_repo: &Path) -> Self {
        let path = main_repo
            .canonicalize()
            .unwrap_or_else(|_| main_repo.to_path_buf());
        Self {
            main: WorktreeInfo::from_path(path, true),
            known: BTreeMap::new(),
        }
    }

    /// The main checkout.
    pub const fn main(&self) -> &WorktreeInfo {
        &self.main
    }

    /// Replace the known set with `current` and report what changed.
    ///
    /// Identity is the path. An entry for the main checkout is ignored.
    pub fn apply(&mut self, current: Vec<WorktreeInfo>) -> Changes {
        let mut next: BTreeMap<PathBuf, WorktreeInfo> = current
            .into_iter()
            .filter(|info| info.path != self.main.path)
            .map(|info| (info.path.clone(), info))
            .collect();

        let added = next
            .values()
            .filter(|info| !self.known.contains_key(&info.path))
            .cloned()
            .collect();
        let removed = self
            .known
            .values()
            .filter(|info| !next.contains_key(&info.path))
            .cloned()
            .collect();

        std::mem::swap(&mut self.known, &mut next);
        Changes { added, removed }
    }

    /// Add one worktree. Returns `false` if the path was already known.
    pub fn register(&mut self, info: WorktreeInfo) -> bool {
        if info.path == self.main.path || self.known.contains_key(&info.path) {
            return false;
        }
        self.known.insert(info.path.clone(), info);
        true
    }

    /// Remove a secondary worktree. The main checkout cannot be removed.
    pub fn unregister(&mut self, path: &Path) -> Option<WorktreeInfo> {
        self.known.remove(path)
    }

    /// Number of worktrees including the main checkout.
    pub fn len(&self) -> usize {
        self.known.len() + 1
    }

    pub const fn is_empty(&self) -> bool {
        false
    }

    /// An immutable snapshot of the current entries.
    pub fn index(&self) -> Index {
        Index::build(
            std::iter::once(self.main.clone())
                .chain(self.known.values().cloned())
                .collect(),
        )
    }
}
