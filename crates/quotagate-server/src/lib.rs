//! QuotaGate server library
//!
//! The HTTP surface and wiring for the gateway binary, split out so
//! integration tests can assemble the router in-process.

pub mod app;
pub mod config;
pub mod discovery;
pub mod proxy;

pub use app::{AppState, build_router};
pub use config::{DiscoveryConfig, DiscoveryMode, ServerConfig};
pub use discovery::ProbeDiscovery;
pub use proxy::GatewayError;
