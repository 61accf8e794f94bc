//! Quota prober
//!
//! Performs out-of-band queries against a node's `/usage` endpoint,
//! both as the authoritative quota sync (applies state to the node
//! record) and as a lightweight reachability check (no state
//! mutation) used during failover search.

use crate::client::is_connection_error;
use crate::usage::extract_remaining;
use quotagate_core::{Node, NodeStatus};
use reqwest::{Client, StatusCode};
use thiserror::Error;

/// Classified probe failure. Variants are mutually exclusive and
/// checked in order: connection-class first, then the specific HTTP
/// statuses, then any other HTTP response, then everything else.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Upstream rejected the token (401)")]
    InvalidToken,

    #[error("Upstream throttled the probe (429)")]
    RateLimited,

    /// The node answered, just not with a usable usage document. The
    /// node is reachable; its status must not be downgraded.
    #[error("Unexpected upstream status: {0}")]
    UnexpectedStatus(u16),

    #[error("Probe failed: {0}")]
    Other(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Out-of-band quota and reachability prober.
#[derive(Debug, Clone)]
pub struct QuotaProber {
    client: Client,
}

impl QuotaProber {
    pub fn new(config: &crate::HttpClientConfig) -> crate::Result<Self> {
        Ok(Self {
            client: crate::create_client(config)?,
        })
    }

    /// Build from an existing client (tests, shared pools).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn usage_url(node: &Node) -> String {
        format!("{}/usage", node.base_url.trim_end_matches('/'))
    }

    /// Authoritative quota sync.
    ///
    /// On success the node record is overwritten: quota set, both
    /// timestamps refreshed, failure gate cleared, status derived from
    /// the remaining quota (`Ready`/`Drained`). On failure both
    /// failure counters are bumped and the error class mapped to a
    /// status; an anomalous-but-connected response leaves the status
    /// untouched. Running twice against an unchanged upstream yields
    /// an identical record aside from timestamps.
    pub async fn sync(&self, node: &Node) -> crate::Result<i64> {
        tracing::debug!(id = %node.id, url = %node.base_url, "Syncing node quota");

        let result = self
            .client
            .get(Self::usage_url(node))
            .bearer_auth(&node.auth_token)
            .send()
            .await;

        let error = match result {
            Ok(response) if response.status().is_success() => {
                let doc = response
                    .json::<serde_json::Value>()
                    .await
                    .unwrap_or(serde_json::Value::Null);
                let remaining = extract_remaining(&doc);
                node.apply_sync(remaining);
                if remaining > 0 {
                    tracing::info!(id = %node.id, quota = remaining, "Node is READY");
                } else {
                    tracing::warn!(id = %node.id, "Node is DRAINED");
                }
                return Ok(remaining);
            }
            Ok(response) => match response.status() {
                StatusCode::UNAUTHORIZED => ProbeError::InvalidToken,
                StatusCode::TOO_MANY_REQUESTS => ProbeError::RateLimited,
                status => ProbeError::UnexpectedStatus(status.as_u16()),
            },
            Err(err) if is_connection_error(&err) => ProbeError::Connection(err.to_string()),
            Err(err) => ProbeError::Other(err.to_string()),
        };

        node.record_failure();
        tracing::warn!(id = %node.id, error = %error, "Node quota sync failed");

        match &error {
            ProbeError::Connection(_) | ProbeError::Other(_) => {
                node.set_status(NodeStatus::Offline);
            }
            ProbeError::InvalidToken => node.set_status(NodeStatus::InvalidToken),
            ProbeError::RateLimited => node.set_status(NodeStatus::RateLimited),
            // Reachable but anomalous: do not downgrade the node just
            // because of a connected response
            ProbeError::UnexpectedStatus(_) | ProbeError::Config(_) => {}
        }

        Err(error)
    }

    /// Lightweight reachability probe: same endpoint, same timeout, no
    /// state mutation. Any HTTP response, error statuses included,
    /// counts as reachable; only connection-class failures do not.
    pub async fn is_reachable(&self, node: &Node) -> bool {
        match self
            .client
            .get(Self::usage_url(node))
            .bearer_auth(&node.auth_token)
            .send()
            .await
        {
            // A response arrived, even a 401/500: the node is online
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(id = %node.id, error = %err, "Reachability probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_url_strips_trailing_slash() {
        let node = Node::new("n", "http://node-1:4141/", "tok");
        assert_eq!(QuotaProber::usage_url(&node), "http://node-1:4141/usage");
        let node = Node::new("n", "http://node-1:4141", "tok");
        assert_eq!(QuotaProber::usage_url(&node), "http://node-1:4141/usage");
    }
}
