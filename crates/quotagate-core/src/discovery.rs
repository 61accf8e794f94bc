//! Discovery collaborator contract
//!
//! Discovery mechanisms (static configuration, sequential probing,
//! orchestrator queries) live outside the core; the core only
//! consumes their output, an ordered list of [`NodeSeed`]s.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::{Error, Result};

/// One discovered upstream: connection coordinates plus an optional
/// stable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSeed {
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl NodeSeed {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            name: None,
        }
    }

    /// Derive the stable node id: discovery name, else URL host, else
    /// a positional fallback.
    pub fn node_id(&self, fallback_index: usize) -> String {
        if let Some(name) = &self.name
            && !name.is_empty()
        {
            return name.clone();
        }
        url_host(&self.url).unwrap_or_else(|| format!("node-{}", fallback_index + 1))
    }

    /// Materialize a node record with `status = Unknown` and zeroed
    /// counters.
    pub fn into_node(self, fallback_index: usize) -> Node {
        let id = self.node_id(fallback_index);
        Node::new(id, self.url, self.token)
    }
}

/// Extract the host (and port) portion of a URL, without pulling in a
/// full URL parser.
fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let host = rest.split(['/', '?', '#']).next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// A source of upstream nodes. Implementations may read static
/// configuration, probe a naming convention sequentially, or query a
/// container orchestrator; the registry treats them all the same.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Produce the current ordered node list. Order matters: it is the
    /// registry's priority order, highest index preferred.
    async fn discover(&self) -> Result<Vec<NodeSeed>>;
}

/// Fixed node list (from configuration or environment).
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    seeds: Vec<NodeSeed>,
}

impl StaticDiscovery {
    pub fn new(seeds: Vec<NodeSeed>) -> Self {
        Self { seeds }
    }

    /// Parse a JSON list of `{url, token, name?}` records, as carried
    /// by the `QUOTAGATE_NODES` environment variable.
    pub fn from_json(json: &str) -> Result<Self> {
        let seeds: Vec<NodeSeed> = serde_json::from_str(json)
            .map_err(|e| Error::Discovery(format!("Invalid node list JSON: {}", e)))?;
        Ok(Self::new(seeds))
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<NodeSeed>> {
        Ok(self.seeds.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_prefers_name() {
        let seed = NodeSeed {
            url: "http://copilot-node-1:4141".to_string(),
            token: String::new(),
            name: Some("primary".to_string()),
        };
        assert_eq!(seed.node_id(0), "primary");
    }

    #[test]
    fn test_node_id_falls_back_to_host() {
        let seed = NodeSeed::new("http://copilot-node-7:4141/base", "tok");
        assert_eq!(seed.node_id(0), "copilot-node-7:4141");
    }

    #[test]
    fn test_node_id_positional_fallback() {
        let seed = NodeSeed::new("", "tok");
        assert_eq!(seed.node_id(2), "node-3");
    }

    #[test]
    fn test_from_json() {
        let src = StaticDiscovery::from_json(
            r#"[{"url":"http://a:1","token":"t1"},{"url":"http://b:2","token":"t2","name":"b"}]"#,
        )
        .unwrap();
        assert_eq!(src.seeds.len(), 2);
        assert_eq!(src.seeds[1].name.as_deref(), Some("b"));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(StaticDiscovery::from_json("{not json").is_err());
    }
}
