//! Node registry
//!
//! Ordered, append-only collection of node records plus the active
//! index. Order is a priority list fixed at registration time; the
//! selection policy treats the highest index as primary.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::node::Node;

/// The single shared source of truth for upstream node state.
///
/// Nodes are never removed during the process lifetime; discovery
/// only appends. Membership changes take the write lock, everything
/// else works off cheap `Arc` snapshots.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: RwLock<Vec<Arc<Node>>>,
    /// Index of the currently preferred node. May point at an
    /// unavailable node between selection events; corrected lazily on
    /// next use.
    active: AtomicUsize,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node unless its URL is already registered. Returns the
    /// stored record either way, plus whether it was newly added.
    pub fn register(&self, node: Node) -> (Arc<Node>, bool) {
        let mut nodes = self
            .nodes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = nodes.iter().find(|n| n.base_url == node.base_url) {
            tracing::debug!(url = %node.base_url, "Node already registered, skipping");
            return (existing.clone(), false);
        }
        let node = Arc::new(node);
        nodes.push(node.clone());
        tracing::info!(id = %node.id, url = %node.base_url, index = nodes.len() - 1, "Registered node");
        (node, true)
    }

    pub fn get(&self, index: usize) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(index)
            .cloned()
    }

    /// Cheap point-in-time copy of the node list for iteration.
    pub fn snapshot(&self) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn active_index(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active_index(&self, index: usize) {
        self.active.store(index, Ordering::Release);
    }

    /// The node at the active index, if any.
    pub fn active_node(&self) -> Option<Arc<Node>> {
        self.get(self.active_index())
    }

    /// Point the active index at the last (highest-priority) slot.
    /// The most recently registered node is preferred; earlier nodes
    /// are standby in descending index order.
    pub fn reset_active_to_last(&self) {
        let len = self.len();
        self.set_active_index(len.saturating_sub(1));
    }

    /// Number of nodes currently passing the availability predicate.
    pub fn available_count(&self) -> usize {
        self.snapshot().iter().filter(|n| n.is_available()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;

    fn node(i: usize) -> Node {
        Node::new(
            format!("node-{}", i),
            format!("http://node-{}:4141", i),
            "tok",
        )
    }

    #[test]
    fn test_register_appends_in_order() {
        let registry = Registry::new();
        let (a, added_a) = registry.register(node(1));
        let (b, added_b) = registry.register(node(2));
        assert!(added_a && added_b);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(0).unwrap().id, a.id);
        assert_eq!(registry.get(1).unwrap().id, b.id);
    }

    #[test]
    fn test_register_skips_duplicate_urls() {
        let registry = Registry::new();
        registry.register(node(1));
        let (existing, added) = registry.register(Node::new(
            "renamed",
            "http://node-1:4141",
            "other-token",
        ));
        assert!(!added);
        assert_eq!(existing.id, "node-1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_new_registrations_start_unknown() {
        let registry = Registry::new();
        let (n, _) = registry.register(node(1));
        assert_eq!(n.status(), NodeStatus::Unknown);
        assert_eq!(n.quota_remaining(), 0);
        assert_eq!(n.consecutive_failures(), 0);
    }

    #[test]
    fn test_reset_active_to_last() {
        let registry = Registry::new();
        registry.register(node(1));
        registry.register(node(2));
        registry.register(node(3));
        registry.reset_active_to_last();
        assert_eq!(registry.active_index(), 2);
        assert_eq!(registry.active_node().unwrap().id, "node-3");
    }

    #[test]
    fn test_reset_active_on_empty_registry() {
        let registry = Registry::new();
        registry.reset_active_to_last();
        assert_eq!(registry.active_index(), 0);
        assert!(registry.active_node().is_none());
    }

    #[test]
    fn test_available_count() {
        let registry = Registry::new();
        let (a, _) = registry.register(node(1));
        let (b, _) = registry.register(node(2));
        assert_eq!(registry.available_count(), 0);
        a.apply_sync(5);
        b.apply_sync(0);
        assert_eq!(registry.available_count(), 1);
    }
}
