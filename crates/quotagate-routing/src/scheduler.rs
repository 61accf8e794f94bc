//! Background sweeps
//!
//! Periodic re-checks that run independently of request traffic:
//! quota refresh, drained-node recheck, offline recovery, and
//! discovery. Sweeps never block each other or the request path;
//! overlapping runs against the same node are tolerated because sync
//! results are last-write-wins.

use futures::future::join_all;
use quotagate_core::{DiscoverySource, NodeStatus, Registry};
use quotagate_probe::QuotaProber;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Sweep cadences, in seconds. A zero discovery interval disables the
/// discovery sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Re-probe every node that is neither INVALID_TOKEN nor DRAINED
    #[serde(default = "default_quota_sweep_secs")]
    pub quota_sweep_secs: u64,

    /// Re-probe DRAINED nodes to detect quota renewal; intentionally
    /// much slower than the quota sweep
    #[serde(default = "default_drained_sweep_secs")]
    pub drained_sweep_secs: u64,

    /// Reachability-check OFFLINE nodes; intentionally fast
    #[serde(default = "default_offline_recovery_secs")]
    pub offline_recovery_secs: u64,

    /// Re-run discovery and register unseen nodes; 0 disables
    #[serde(default)]
    pub discovery_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            quota_sweep_secs: default_quota_sweep_secs(),
            drained_sweep_secs: default_drained_sweep_secs(),
            offline_recovery_secs: default_offline_recovery_secs(),
            discovery_secs: 0,
        }
    }
}

fn default_quota_sweep_secs() -> u64 {
    300
}

fn default_drained_sweep_secs() -> u64 {
    3600
}

fn default_offline_recovery_secs() -> u64 {
    30
}

/// Drives the periodic sweeps against the registry.
pub struct Scheduler {
    registry: Arc<Registry>,
    prober: Arc<QuotaProber>,
    config: SweepConfig,
    discovery: Option<Arc<dyn DiscoverySource>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<Registry>,
        prober: Arc<QuotaProber>,
        config: SweepConfig,
        discovery: Option<Arc<dyn DiscoverySource>>,
    ) -> Self {
        Self {
            registry,
            prober,
            config,
            discovery,
        }
    }

    /// Probe every node once, concurrently. Run at startup before the
    /// periodic sweeps take over.
    pub async fn initial_sweep(&self) {
        tracing::info!("Starting initial quota sweep");
        let nodes = self.registry.snapshot();
        join_all(nodes.iter().map(|node| self.prober.sync(node))).await;
    }

    /// One pass of the regular quota sweep: every node that is neither
    /// permanently excluded (INVALID_TOKEN) nor owned by the slower
    /// drained sweep.
    pub async fn run_quota_sweep(&self) {
        let nodes: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|n| {
                !matches!(n.status(), NodeStatus::InvalidToken | NodeStatus::Drained)
            })
            .collect();
        tracing::debug!(count = nodes.len(), "Running quota sweep");
        join_all(nodes.iter().map(|node| self.prober.sync(node))).await;
    }

    /// One pass of the drained-node sweep, detecting quota renewal.
    pub async fn run_drained_sweep(&self) {
        let nodes: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|n| n.status() == NodeStatus::Drained)
            .collect();
        if !nodes.is_empty() {
            tracing::info!(count = nodes.len(), "Rechecking drained nodes");
        }
        join_all(nodes.iter().map(|node| self.prober.sync(node))).await;
    }

    /// One pass of the offline-recovery sweep: reachability-probe each
    /// OFFLINE node and, on contact, clear its failure gate and run a
    /// full sync.
    pub async fn run_offline_recovery_sweep(&self) {
        let offline: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|n| n.status() == NodeStatus::Offline)
            .collect();
        if offline.is_empty() {
            return;
        }
        tracing::info!(count = offline.len(), "Checking offline nodes for recovery");
        for node in offline {
            if self.prober.is_reachable(&node).await {
                tracing::info!(id = %node.id, "Offline node is back, re-syncing quota");
                node.reset_consecutive_failures();
                let _ = self.prober.sync(&node).await;
            }
        }
    }

    /// One pass of the discovery sweep: fetch the current node list,
    /// register unseen URLs, and immediately sync each new node.
    pub async fn run_discovery_sweep(&self) {
        let Some(discovery) = &self.discovery else {
            return;
        };
        let seeds = match discovery.discover().await {
            Ok(seeds) => seeds,
            Err(e) => {
                tracing::warn!(error = %e, "Discovery sweep failed");
                return;
            }
        };
        for seed in seeds {
            let node = seed.into_node(self.registry.len());
            let (node, added) = self.registry.register(node);
            if added {
                tracing::info!(id = %node.id, "Discovered new node, scheduling sync");
                let _ = self.prober.sync(&node).await;
            }
        }
    }

    /// Spawn all sweep loops as independent tasks. They run for the
    /// lifetime of the process; none of them is fatal on error.
    pub fn spawn(self: Arc<Self>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(scheduler.config.quota_sweep_secs));
            interval.tick().await; // first tick fires immediately; initial_sweep covered it
            loop {
                interval.tick().await;
                scheduler.run_quota_sweep().await;
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(scheduler.config.drained_sweep_secs));
            interval.tick().await;
            loop {
                interval.tick().await;
                scheduler.run_drained_sweep().await;
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                scheduler.config.offline_recovery_secs,
            ));
            interval.tick().await;
            loop {
                interval.tick().await;
                scheduler.run_offline_recovery_sweep().await;
            }
        });

        if self.config.discovery_secs > 0 && self.discovery.is_some() {
            let scheduler = self.clone();
            tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(scheduler.config.discovery_secs));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    scheduler.run_discovery_sweep().await;
                }
            });
        }
    }
}
