//! Per-node mutual exclusion.
//!
//! Every read-modify-write of a node's allocation record inside this process
//! happens while holding that node's lock. Locks are created on first use and
//! live for the life of the process.

use std::collections::HashMap;
use std::sync::Arc;

use devalloc_core::NodeName;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by node name.
#[derive(Debug, Default)]
pub struct PerNodeMutex {
    locks: Mutex<HashMap<NodeName, Arc<AsyncMutex<()>>>>,
}

impl PerNodeMutex {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for a node, created on first use.
    #[must_use]
    pub fn get(&self, node: &NodeName) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(node.clone()).or_default())
    }

    /// Wait for exclusive access to a node. Released when the guard drops.
    pub async fn lock(&self, node: &NodeName) -> OwnedMutexGuard<()> {
        self.get(node).lock_owned().await
    }

    /// Number of nodes seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Whether no node has been locked yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_node_shares_a_mutex() {
        let locks = PerNodeMutex::new();
        let a = NodeName::new("a");

        assert!(Arc::ptr_eq(&locks.get(&a), &locks.get(&a)));
        assert!(!Arc::ptr_eq(&locks.get(&a), &locks.get(&NodeName::new("b"))));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn lock_excludes_until_guard_drops() {
        let locks = PerNodeMutex::new();
        let node = NodeName::new("a");

        let guard = locks.lock(&node).await;
        assert!(locks.get(&node).try_lock().is_err());

        // Other nodes are unaffected.
        assert!(locks.get(&NodeName::new("b")).try_lock().is_ok());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_secs(1), locks.lock(&node)).await;
        assert!(reacquired.is_ok());
    }
}
