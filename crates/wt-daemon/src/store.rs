//! Shared reactive state derived from the registry.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::reactive::Signal;
use crate::registry::Index;

/// Read-mostly view that subsystems subscribe to.
pub struct Store {
    /// Latest registry snapshot. Published after every registry mutation.
    pub worktrees: Signal<Arc<Index>>,
    /// Branches checked out in some known worktree.
    pub active_branches: Signal<BTreeSet<String>>,
}

impl Store {
    /// A store seeded with `index` and its branches.
    pub fn new(index: Index) -> Self {
        Self {
            worktrees: Signal::new(Arc::new(index)),
            active_branches: Signal::new(BTreeSet::new()),
        }
    }

    /// The current worktree index.
    pub fn index(&self) -> Arc<Index> {
        self.worktrees.get()
    }
}
