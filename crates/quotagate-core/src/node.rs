//! Node records
//!
//! A [`Node`] describes one upstream backend: its connection
//! coordinates plus mutable health state. All mutable fields use
//! atomics or `RwLock` so a node handed out as `Arc<Node>` can be
//! updated concurrently by sweeps and request handlers without a
//! registry-wide lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::{TRIED_NODE_SENTINEL, UNAVAILABLE_FAILURE_THRESHOLD};

/// Lifecycle status of an upstream node.
///
/// Serialized values match the wire format surfaced by `/health`
/// (`READY`, `INVALID_TOKEN`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    /// Registered but never successfully probed
    Unknown,
    /// Reachable with confirmed quota
    Ready,
    /// Reachable but quota exhausted; rechecked on the slow sweep
    Drained,
    /// Connection-level failures; rechecked on the recovery sweep
    Offline,
    /// Upstream rejected the bearer token (401). Permanent until
    /// externally corrected: excluded from sweeps and failover.
    InvalidToken,
    /// Upstream throttled the probe (429); transient
    RateLimited,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NodeStatus::Unknown => "UNKNOWN",
            NodeStatus::Ready => "READY",
            NodeStatus::Drained => "DRAINED",
            NodeStatus::Offline => "OFFLINE",
            NodeStatus::InvalidToken => "INVALID_TOKEN",
            NodeStatus::RateLimited => "RATE_LIMITED",
        };
        write!(f, "{}", s)
    }
}

/// One upstream backend with its own credentials and quota.
#[derive(Debug)]
pub struct Node {
    /// Stable unique identifier (discovery name or URL host)
    pub id: String,
    /// Base URL requests and probes are issued against
    pub base_url: String,
    /// Bearer token used for this node's upstream auth
    pub auth_token: String,

    status: RwLock<NodeStatus>,
    /// Best-effort remaining premium capacity, floor 0. Overwritten
    /// by every successful sync; optimistic decrements are advisory.
    quota_remaining: AtomicI64,
    last_checked_at: RwLock<Option<DateTime<Utc>>>,
    last_healthy_at: RwLock<Option<DateTime<Utc>>>,
    /// Monotonic count of all sync/proxy failures, informational
    total_failures: AtomicU64,
    /// Reset to 0 on any success; gates availability independently of
    /// status
    consecutive_failures: AtomicU32,
}

impl Node {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        auth_token: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            auth_token: auth_token.into(),
            status: RwLock::new(NodeStatus::Unknown),
            quota_remaining: AtomicI64::new(0),
            last_checked_at: RwLock::new(None),
            last_healthy_at: RwLock::new(None),
            total_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn status(&self) -> NodeStatus {
        *self
            .status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = status;
    }

    pub fn quota_remaining(&self) -> i64 {
        self.quota_remaining.load(Ordering::Acquire)
    }

    /// Set the quota estimate, clamped at 0.
    pub fn set_quota_remaining(&self, remaining: i64) {
        self.quota_remaining
            .store(remaining.max(0), Ordering::Release);
    }

    /// Optimistic decrement after a successful forwarded request.
    /// A placeholder cost of one unit; the next sync is authoritative.
    pub fn decrement_quota(&self) {
        self.quota_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current - 1).max(0))
            })
            .ok();
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Acquire)
    }

    pub fn last_checked_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_checked_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn last_healthy_at(&self) -> Option<DateTime<Utc>> {
        *self
            .last_healthy_at
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a sync or proxy failure: bumps both counters.
    pub fn record_failure(&self) {
        self.total_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(1))
            })
            .ok();
        self.bump_consecutive_failures();
    }

    /// Bump only the consecutive-failure gate, returning the new value.
    pub fn bump_consecutive_failures(&self) -> u32 {
        self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a successfully forwarded request: clears the failure
    /// gate, refreshes the healthy timestamp, and applies the
    /// optimistic decrement.
    pub fn record_request_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        *self
            .last_healthy_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());
        self.decrement_quota();
    }

    /// Force this node out of contention for the rest of a request
    /// (used when the proxy loop re-encounters an already-tried node).
    pub fn force_deprioritize(&self) {
        self.consecutive_failures
            .store(TRIED_NODE_SENTINEL, Ordering::Release);
    }

    /// Clear the consecutive-failure gate without touching quota or
    /// timestamps (offline-recovery sweep, pre-resync).
    pub fn reset_consecutive_failures(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Apply an authoritative probe result. Sets quota, refreshes both
    /// timestamps, clears the failure gate, and derives status from
    /// the remaining quota.
    pub fn apply_sync(&self, remaining: i64) {
        let now = Utc::now();
        self.set_quota_remaining(remaining);
        *self
            .last_checked_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
        *self
            .last_healthy_at
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(now);
        self.consecutive_failures.store(0, Ordering::Release);
        self.set_status(if remaining > 0 {
            NodeStatus::Ready
        } else {
            NodeStatus::Drained
        });
    }

    /// Availability is derived at use time, never cached: the node
    /// must be `Ready`, have quota left, and sit below the
    /// consecutive-failure threshold. A node can be `Ready` yet
    /// unavailable after optimistic decrements reach 0.
    pub fn is_available(&self) -> bool {
        if self.status() != NodeStatus::Ready {
            return false;
        }
        if self.quota_remaining() <= 0 {
            return false;
        }
        if self.consecutive_failures() >= UNAVAILABLE_FAILURE_THRESHOLD {
            return false;
        }
        true
    }

    /// Point-in-time copy of the mutable state, for `/health`.
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id.clone(),
            status: self.status(),
            quota_remaining: self.quota_remaining(),
            consecutive_failures: self.consecutive_failures(),
            total_failures: self.total_failures(),
            last_checked_at: self.last_checked_at(),
            last_healthy_at: self.last_healthy_at(),
        }
    }
}

/// Immutable snapshot of a node's mutable state.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub id: String,
    pub status: NodeStatus,
    pub quota_remaining: i64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_healthy_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node_is_unknown_and_unavailable() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        assert_eq!(node.status(), NodeStatus::Unknown);
        assert_eq!(node.quota_remaining(), 0);
        assert_eq!(node.consecutive_failures(), 0);
        assert!(node.last_checked_at().is_none());
        assert!(node.last_healthy_at().is_none());
        assert!(!node.is_available());
    }

    #[test]
    fn test_quota_never_goes_negative() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.set_quota_remaining(1);
        node.decrement_quota();
        node.decrement_quota();
        node.decrement_quota();
        assert_eq!(node.quota_remaining(), 0);

        node.set_quota_remaining(-5);
        assert_eq!(node.quota_remaining(), 0);
    }

    #[test]
    fn test_apply_sync_derives_status_from_quota() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.record_failure();

        node.apply_sync(42);
        assert_eq!(node.status(), NodeStatus::Ready);
        assert_eq!(node.quota_remaining(), 42);
        assert_eq!(node.consecutive_failures(), 0);
        assert!(node.last_checked_at().is_some());
        assert!(node.last_healthy_at().is_some());

        node.apply_sync(0);
        assert_eq!(node.status(), NodeStatus::Drained);
        assert!(!node.is_available());
    }

    #[test]
    fn test_availability_predicate() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.apply_sync(5);
        assert!(node.is_available());

        // Ready but quota drawn down to zero by optimistic decrements
        node.set_quota_remaining(0);
        assert_eq!(node.status(), NodeStatus::Ready);
        assert!(!node.is_available());

        // Quota back, but failure gate tripped
        node.set_quota_remaining(5);
        node.record_failure();
        assert!(node.is_available());
        node.record_failure();
        assert!(!node.is_available());
    }

    #[test]
    fn test_record_request_success_resets_gate_and_decrements() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.apply_sync(5);
        node.record_failure();

        node.record_request_success();
        assert_eq!(node.consecutive_failures(), 0);
        assert_eq!(node.quota_remaining(), 4);
        assert!(node.last_healthy_at().is_some());
    }

    #[test]
    fn test_force_deprioritize_makes_node_unavailable() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.apply_sync(5);
        node.force_deprioritize();
        assert!(!node.is_available());
        assert_eq!(node.consecutive_failures(), crate::TRIED_NODE_SENTINEL);
    }

    #[test]
    fn test_total_failures_is_monotonic() {
        let node = Node::new("node-1", "http://node-1:4141", "tok");
        node.record_failure();
        node.record_failure();
        node.apply_sync(5);
        // Sync clears the gate but never the monotonic counter
        assert_eq!(node.total_failures(), 2);
        assert_eq!(node.consecutive_failures(), 0);
    }

    #[test]
    fn test_status_serialization_wire_format() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::InvalidToken).unwrap(),
            "\"INVALID_TOKEN\""
        );
        assert_eq!(
            serde_json::to_string(&NodeStatus::Ready).unwrap(),
            "\"READY\""
        );
        assert_eq!(NodeStatus::RateLimited.to_string(), "RATE_LIMITED");
    }
}
