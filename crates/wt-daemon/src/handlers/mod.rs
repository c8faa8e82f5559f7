//! RPC method implementations.

mod control;
mod status;
mod worktree;

use std::sync::Arc;

pub use control::{Ping, PrRefreshNow, Shutdown};
pub use status::GetStatus;
pub use worktree::{
    WorktreeCreate, WorktreeDelete, WorktreeGetByName, WorktreeIdentify, WorktreeList,
    validate_name,
};

use crate::rpc::{RpcRegistry, Services};

/// The registry with every method the daemon serves.
pub fn registry(services: Arc<Services>) -> RpcRegistry {
    let mut registry = RpcRegistry::new(services);
    registry
        .register::<GetStatus>()
        .register::<PrRefreshNow>()
        .register::<Ping>()
        .register::<Shutdown>()
        .register::<WorktreeList>()
        .register::<WorktreeIdentify>()
        .register::<WorktreeGetByName>()
        .register_stream::<WorktreeCreate>()
        .register::<WorktreeDelete>();
    registry
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{FakeGit, services};

    #[test]
    fn every_method_is_registered() {
        let main = tempfile::tempdir().unwrap();
        let registry = registry(services(main.path(), Arc::new(FakeGit::default())));
        assert_eq!(
            registry.methods(),
            vec![
                "get_status",
                "ping",
                "pr_refresh_now",
                "shutdown",
                "worktree_create",
                "worktree_delete",
                "worktree_get_by_name",
                "worktree_identify",
                "worktree_list",
            ]
        );
    }
}
