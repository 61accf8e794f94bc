//! Shared HTTP client utilities

use crate::{ProbeError, Result};
use reqwest::{Client, ClientBuilder};
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    /// Note: This applies to the entire request. The default suits
    /// health/quota probes; the request-forwarding client overrides it
    /// with a longer budget for slow generative responses.
    pub timeout_secs: u64,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Maximum number of idle connections per host
    pub pool_max_idle_per_host: usize,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            connect_timeout_secs: 5,
            pool_max_idle_per_host: 32,
            user_agent: format!("QuotaGate/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Configuration for the request-forwarding client: a long overall
    /// timeout so generative upstream responses can stream to
    /// completion.
    pub fn forwarding(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            ..Self::default()
        }
    }
}

/// Create a configured HTTP client with connection pooling
pub fn create_client(config: &HttpClientConfig) -> Result<Client> {
    ClientBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        // Expire idle connections before upstream servers close them;
        // reusing a connection the server already dropped shows up as
        // a stuck request.
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(&config.user_agent)
        // Use rustls for TLS (no openssl dependency)
        .use_rustls_tls()
        // TCP keep-alive prevents middlebox timeouts during long requests
        .tcp_keepalive(Duration::from_secs(60))
        // Disable automatic decompression: the proxy relays the exact
        // upstream bytes, content-encoding header included
        .no_gzip()
        .no_brotli()
        .no_deflate()
        .build()
        .map_err(|e| ProbeError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Whether a transport error is connection-class (refused, timed out,
/// unresolved, reset, unreachable). Connection-class errors mark a
/// node `Offline` immediately; other transport errors escalate only
/// after repeated failures.
pub fn is_connection_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_probe_sized() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.connect_timeout_secs, 5);
        assert!(config.user_agent.starts_with("QuotaGate/"));
    }

    #[test]
    fn test_forwarding_config_overrides_timeout() {
        let config = HttpClientConfig::forwarding(30);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 5);
    }

    #[test]
    fn test_create_client() {
        let config = HttpClientConfig::default();
        assert!(create_client(&config).is_ok());
    }
}
