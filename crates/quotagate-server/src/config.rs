use quotagate_core::NodeSeed;
use quotagate_routing::SweepConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Use the configured node list as-is
    Static,
    /// Sequentially probe a naming convention until nodes stop
    /// answering
    Probe,
}

impl Default for DiscoveryMode {
    fn default() -> Self {
        DiscoveryMode::Static
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Ordered node list for static discovery. Order is the priority
    /// list: the last entry is the preferred node.
    #[serde(default)]
    pub nodes: Vec<NodeSeed>,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub sweeps: SweepConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub mode: DiscoveryMode,

    /// Hostname prefix probed as `{probe_base}-{i}:{probe_port}`
    #[serde(default = "default_probe_base")]
    pub probe_base: String,

    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    /// Upper bound on sequential probes
    #[serde(default = "default_max_probes")]
    pub max_probes: usize,

    /// Stop probing after this many consecutive missing nodes
    #[serde(default = "default_stop_after_misses")]
    pub stop_after_misses: usize,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Health/quota probe timeout; short so sweeps stay cheap
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,

    /// Request-forwarding timeout; long enough for slow generative
    /// responses
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nodes: Vec::new(),
            discovery: DiscoveryConfig::default(),
            sweeps: SweepConfig::default(),
            timeouts: TimeoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            mode: DiscoveryMode::default(),
            probe_base: default_probe_base(),
            probe_port: default_probe_port(),
            max_probes: default_max_probes(),
            stop_after_misses: default_stop_after_misses(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        self.merge_env_from(|key| std::env::var(key).ok());
    }

    /// Same merge, with the variable lookup injected so the logic can
    /// be exercised without mutating process-wide state.
    pub fn merge_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        // Explicit node list: a JSON array of {url, token, name?}.
        // Presence of the variable also forces static discovery.
        if let Some(val) = var("QUOTAGATE_NODES") {
            match serde_json::from_str::<Vec<NodeSeed>>(&val) {
                Ok(seeds) => {
                    self.nodes = seeds;
                    self.discovery.mode = DiscoveryMode::Static;
                }
                Err(e) => {
                    eprintln!("Warning: Invalid QUOTAGATE_NODES JSON ({}), ignoring", e)
                }
            }
        }

        if let Some(val) = var("QUOTAGATE_DISCOVERY_MODE") {
            match val.to_lowercase().as_str() {
                "static" => self.discovery.mode = DiscoveryMode::Static,
                "probe" => self.discovery.mode = DiscoveryMode::Probe,
                _ => eprintln!(
                    "Warning: Invalid QUOTAGATE_DISCOVERY_MODE '{}', using default",
                    val
                ),
            }
        }

        // Quota sweep interval in seconds
        if let Some(val) = var("QUOTAGATE_POLL_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                self.sweeps.quota_sweep_secs = secs;
            }
        }

        if let Some(val) = var("QUOTAGATE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Some(val) = var("QUOTAGATE_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.port = port;
            }
        }

        if let Some(val) = var("QUOTAGATE_HOST") {
            self.host = val;
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_probe_base() -> String {
    "http://copilot-node".to_string()
}

fn default_probe_port() -> u16 {
    4141
}

fn default_max_probes() -> usize {
    20
}

fn default_stop_after_misses() -> usize {
    3
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_probe_secs() -> u64 {
    5
}

fn default_request_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.nodes.is_empty());
        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
        assert_eq!(config.discovery.max_probes, 20);
        assert_eq!(config.discovery.stop_after_misses, 3);
        assert_eq!(config.timeouts.probe_secs, 5);
        assert_eq!(config.timeouts.request_secs, 30);
        assert_eq!(config.sweeps.quota_sweep_secs, 300);
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            r#"
port: 8080
nodes:
  - url: http://node-1:4141
    token: tok-1
  - url: http://node-2:4141
    token: tok-2
    name: spare
sweeps:
  quota_sweep_secs: 60
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].name.as_deref(), Some("spare"));
        assert_eq!(config.sweeps.quota_sweep_secs, 60);
        // Untouched sections keep their defaults
        assert_eq!(config.timeouts.request_secs, 30);
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
port = 9090

[[nodes]]
url = "http://node-1:4141"
token = "tok-1"

[discovery]
mode = "probe"
max_probes = 5
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.discovery.mode, DiscoveryMode::Probe);
        assert_eq!(config.discovery.max_probes, 5);
    }

    fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_merge_env_node_list_forces_static_mode() {
        let mut config = ServerConfig::default();
        config.discovery.mode = DiscoveryMode::Probe;

        config.merge_env_from(env_of(&[(
            "QUOTAGATE_NODES",
            r#"[{"url":"http://a:1","token":"t1"},{"url":"http://b:2","token":"t2","name":"spare"}]"#,
        )]));

        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[0].url, "http://a:1");
        assert_eq!(config.nodes[1].name.as_deref(), Some("spare"));
    }

    #[test]
    fn test_merge_env_scalar_overrides() {
        let mut config = ServerConfig::default();

        config.merge_env_from(env_of(&[
            ("QUOTAGATE_POLL_INTERVAL", "60"),
            ("QUOTAGATE_PORT", "8081"),
            ("QUOTAGATE_HOST", "127.0.0.1"),
            ("QUOTAGATE_LOG_LEVEL", "debug"),
            ("QUOTAGATE_DISCOVERY_MODE", "probe"),
        ]));

        assert_eq!(config.sweeps.quota_sweep_secs, 60);
        assert_eq!(config.port, 8081);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.discovery.mode, DiscoveryMode::Probe);
    }

    #[test]
    fn test_merge_env_ignores_invalid_values() {
        let mut config = ServerConfig::default();
        config.nodes = vec![NodeSeed::new("http://keep:1", "tok")];

        config.merge_env_from(env_of(&[
            ("QUOTAGATE_NODES", "{not json"),
            ("QUOTAGATE_PORT", "not-a-port"),
            ("QUOTAGATE_POLL_INTERVAL", "soon"),
            ("QUOTAGATE_DISCOVERY_MODE", "magic"),
        ]));

        // Bad values leave the existing config untouched
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].url, "http://keep:1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.sweeps.quota_sweep_secs, 300);
        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
    }

    #[test]
    fn test_merge_env_no_vars_is_a_no_op() {
        let mut config = ServerConfig::default();
        config.merge_env_from(|_| None);
        assert_eq!(config.port, 3000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.nodes.is_empty());
    }
}
