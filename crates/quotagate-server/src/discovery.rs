//! Node discovery
//!
//! Two sources: the static list from configuration (handled by
//! [`StaticDiscovery`] in the core crate) and sequential probing of a
//! naming convention (`{base}-1`, `{base}-2`, ...) for container
//! deployments without explicit configuration.

use async_trait::async_trait;
use quotagate_core::{DiscoverySource, Error, NodeSeed, Result};
use std::time::Duration;

use crate::config::DiscoveryConfig;

/// Sequentially probes `{probe_base}-{i}:{probe_port}` until too many
/// consecutive nodes are missing.
pub struct ProbeDiscovery {
    client: reqwest::Client,
    config: DiscoveryConfig,
}

impl ProbeDiscovery {
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.probe_timeout_secs))
            .build()
            .map_err(|e| Error::Discovery(format!("Failed to create probe client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl DiscoverySource for ProbeDiscovery {
    async fn discover(&self) -> Result<Vec<NodeSeed>> {
        let mut seeds = Vec::new();
        let mut consecutive_misses = 0usize;

        for i in 1..=self.config.max_probes {
            let url = format!("{}-{}:{}", self.config.probe_base, i, self.config.probe_port);
            match self.client.get(&url).send().await {
                Ok(_) => {
                    tracing::info!(url = %url, "Discovered node");
                    seeds.push(NodeSeed::new(url, ""));
                    consecutive_misses = 0;
                }
                Err(err) if err.is_connect() => {
                    consecutive_misses += 1;
                    tracing::debug!(url = %url, "No node at probe target");
                    if consecutive_misses >= self.config.stop_after_misses {
                        tracing::info!(
                            misses = consecutive_misses,
                            "Stopping probe discovery after consecutive misses"
                        );
                        break;
                    }
                }
                Err(err) => {
                    // The host exists but responded abnormally (e.g.
                    // timed out mid-handshake): still a node
                    tracing::info!(url = %url, error = %err, "Discovered node (abnormal response)");
                    seeds.push(NodeSeed::new(url, ""));
                    consecutive_misses = 0;
                }
            }
        }

        tracing::info!(count = seeds.len(), "Probe discovery finished");
        Ok(seeds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryMode;

    #[tokio::test]
    async fn test_probe_discovery_stops_after_consecutive_misses() {
        // Nothing listens on these ports; every probe is a miss, so
        // discovery stops after `stop_after_misses` attempts.
        let config = DiscoveryConfig {
            mode: DiscoveryMode::Probe,
            probe_base: "http://127.0.0.1".to_string(),
            probe_port: 1,
            max_probes: 20,
            stop_after_misses: 3,
            probe_timeout_secs: 1,
        };
        let discovery = ProbeDiscovery::new(config).unwrap();
        let seeds = discovery.discover().await.unwrap();
        assert!(seeds.is_empty());
    }
}
