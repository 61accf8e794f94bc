//! Active-node selection and failover
//!
//! Selection policy is reverse priority: the most recently registered
//! node (highest index) is primary, earlier nodes are standby in
//! descending index order. Newest nodes are assumed least
//! quota-depleted, which gives a deterministic tie-break without
//! ranking live quotas on every request.

use quotagate_core::{Node, NodeStatus, Registry};
use quotagate_probe::QuotaProber;
use std::sync::Arc;

/// Chooses which node a request should use and searches for a
/// replacement when the current choice is unusable.
#[derive(Clone)]
pub struct FailoverEngine {
    registry: Arc<Registry>,
    prober: Arc<QuotaProber>,
}

impl FailoverEngine {
    pub fn new(registry: Arc<Registry>, prober: Arc<QuotaProber>) -> Self {
        Self { registry, prober }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Return the node new requests should use.
    ///
    /// The current active node is kept if it passes the availability
    /// predicate; otherwise the registry is scanned from the highest
    /// index down and the first available node is adopted. `None`
    /// means the whole pool is unavailable.
    pub fn select_active(&self) -> Option<Arc<Node>> {
        if let Some(node) = self.registry.active_node()
            && node.is_available()
        {
            return Some(node);
        }

        let nodes = self.registry.snapshot();
        for index in (0..nodes.len()).rev() {
            if nodes[index].is_available() {
                self.registry.set_active_index(index);
                tracing::info!(
                    id = %nodes[index].id,
                    index,
                    "Switched active node"
                );
                return Some(nodes[index].clone());
            }
        }

        None
    }

    /// Search for a replacement after the active node is known bad.
    ///
    /// Pass A scans below the current active index (descending), pass
    /// B wraps around from the top down to just above it. Candidates
    /// already `InvalidToken` or `Offline` are skipped outright; the
    /// rest get a reachability probe, and reachable ones are adopted
    /// and fully re-synced before being returned. An unreachable
    /// candidate is marked `Offline` so neither pass revisits it.
    /// `None` means the pool is exhausted.
    pub async fn failover(&self, failed: Option<&Node>, reason: &str) -> Option<Arc<Node>> {
        let original = self.registry.active_index();

        if let Some(failed) = failed {
            let failures = failed.bump_consecutive_failures();
            tracing::info!(id = %failed.id, failures, "Recorded failure on outgoing node");
        }

        let nodes = self.registry.snapshot();

        // Pass A: active-1 down to 0
        for index in (0..original.min(nodes.len())).rev() {
            if let Some(node) = self.try_candidate(index, &nodes[index], original, reason).await {
                return Some(node);
            }
        }

        // Pass B: wrap around, highest index down to active+1
        for index in ((original + 1)..nodes.len()).rev() {
            if let Some(node) = self.try_candidate(index, &nodes[index], original, reason).await {
                return Some(node);
            }
        }

        tracing::error!(reason, "Failover found no available node");
        None
    }

    async fn try_candidate(
        &self,
        index: usize,
        node: &Arc<Node>,
        original: usize,
        reason: &str,
    ) -> Option<Arc<Node>> {
        match node.status() {
            NodeStatus::InvalidToken | NodeStatus::Offline => return None,
            _ => {}
        }

        if !self.prober.is_reachable(node).await {
            node.set_status(NodeStatus::Offline);
            tracing::warn!(id = %node.id, "Candidate unreachable, marked OFFLINE");
            return None;
        }

        self.registry.set_active_index(index);
        tracing::info!(
            from = original,
            to = index,
            id = %node.id,
            reason,
            "Failing over"
        );

        // Adopt first, then confirm with an authoritative sync; a
        // candidate that syncs into Drained/InvalidToken keeps the
        // search going.
        let _ = self.prober.sync(node).await;
        if node.is_available() {
            return Some(node.clone());
        }
        None
    }

    /// Force-adopt the highest-index node that is `Ready` with quota
    /// left (admin reset). Unlike `select_active` this ignores the
    /// consecutive-failure gate.
    pub fn reset_active(&self) -> Option<(usize, Arc<Node>)> {
        let nodes = self.registry.snapshot();
        for index in (0..nodes.len()).rev() {
            let node = &nodes[index];
            if node.status() == NodeStatus::Ready && node.quota_remaining() > 0 {
                self.registry.set_active_index(index);
                tracing::info!(id = %node.id, index, "Active node reset");
                return Some((index, node.clone()));
            }
        }
        None
    }
}
