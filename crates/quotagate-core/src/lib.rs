//! QuotaGate Core
//!
//! Shared state model for the gateway:
//! - Node records with status, quota, and failure counters
//! - The ordered node registry and active-index bookkeeping
//! - The availability predicate used by selection and failover

pub mod discovery;
pub mod error;
pub mod node;
pub mod registry;

pub use discovery::{DiscoverySource, NodeSeed, StaticDiscovery};
pub use error::{Error, Result};
pub use node::{Node, NodeSnapshot, NodeStatus};
pub use registry::Registry;

/// Quota value assigned when the upstream reports a null limit
/// (unlimited plan).
pub const UNLIMITED_QUOTA: i64 = 999_999;

/// A node with at least this many consecutive failures is skipped by
/// the availability predicate until the next successful sync.
pub const UNAVAILABLE_FAILURE_THRESHOLD: u32 = 2;

/// Sentinel written by the proxy loop to force a node out of
/// contention for the remainder of a request. Cleared by the next
/// successful sync or forwarded request.
pub const TRIED_NODE_SENTINEL: u32 = 999;
