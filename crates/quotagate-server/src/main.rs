//! QuotaGate server
//!
//! Quota-aware failover gateway for a pool of API nodes:
//! - Accepts `/v1/*` requests and forwards them to the active node
//! - Tracks per-node premium quota via each node's `/usage` endpoint
//! - Fails over to standby nodes on quota exhaustion or node loss
//! - Background sweeps re-check quota, drained nodes, and offline nodes
//!
//! Usage:
//! ```bash
//! # With config file
//! quotagate-server --config config.yaml
//!
//! # Or with environment variables
//! QUOTAGATE_NODES='[{"url":"http://node-1:4141","token":"tok"}]' quotagate-server
//!
//! # With both (env vars override config)
//! QUOTAGATE_NODES='[...]' quotagate-server --config config.yaml
//! ```

use clap::Parser;
use quotagate_core::{DiscoverySource, Registry, StaticDiscovery};
use quotagate_probe::{HttpClientConfig, QuotaProber, create_client};
use quotagate_routing::{FailoverEngine, Scheduler};
use quotagate_server::config::{DiscoveryMode, ServerConfig};
use quotagate_server::{AppState, ProbeDiscovery, build_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// QuotaGate Server - Quota-aware failover gateway
#[derive(Parser)]
#[command(name = "quotagate-server")]
#[command(about = "Quota-aware failover gateway for API node pools", long_about = None)]
struct Cli {
    /// Path to configuration file (YAML or TOML)
    #[arg(short, long, value_name = "FILE", env = "QUOTAGATE_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = if let Some(config_path) = cli.config {
        info!("📁 Loading configuration from: {}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig::default()
    };

    // Merge environment variables (they override config file)
    config.merge_env();

    // Initialize tracing with configured level
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::new(format!("{}", log_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Initializing QuotaGate");

    // Resolve the discovery source and seed the registry
    let discovery: Arc<dyn DiscoverySource> = match config.discovery.mode {
        DiscoveryMode::Static => Arc::new(StaticDiscovery::new(config.nodes.clone())),
        DiscoveryMode::Probe => Arc::new(ProbeDiscovery::new(config.discovery.clone())?),
    };

    let registry = Arc::new(Registry::new());
    let seeds = discovery.discover().await?;
    for seed in seeds {
        let node = seed.into_node(registry.len());
        let (node, added) = registry.register(node);
        if added {
            info!(id = %node.id, url = %node.base_url, "Registered node");
        }
    }
    // Last-registered node is the preferred primary
    registry.reset_active_to_last();

    if registry.is_empty() {
        warn!("No nodes registered; all requests will fail until discovery finds some");
    } else {
        info!(count = registry.len(), "Node pool ready");
    }

    // Probe stack: short-timeout client for quota syncs, long-timeout
    // client for forwarded requests
    let prober = Arc::new(QuotaProber::new(&HttpClientConfig {
        timeout_secs: config.timeouts.probe_secs,
        ..HttpClientConfig::default()
    })?);
    let forward_client = create_client(&HttpClientConfig::forwarding(
        config.timeouts.request_secs,
    ))?;

    // First quota sync happens before we serve traffic so the initial
    // active choice is informed
    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        prober.clone(),
        config.sweeps.clone(),
        Some(discovery),
    ));
    scheduler.initial_sweep().await;
    scheduler.spawn();

    let engine = FailoverEngine::new(registry.clone(), prober);
    if engine.select_active().is_none() {
        warn!("No node passed its initial quota sync; pool starts degraded");
    }

    let state = AppState {
        engine,
        forward_client,
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("🌐 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
