//! QuotaGate Probe
//!
//! Outbound HTTP concerns for the gateway:
//! - Shared `reqwest` client construction
//! - Quota-document parsing for the upstream `/usage` endpoint
//! - The quota prober (authoritative sync) and the lightweight
//!   reachability probe used during failover

pub mod client;
pub mod prober;
pub mod usage;

pub use client::{HttpClientConfig, create_client, is_connection_error};
pub use prober::{ProbeError, QuotaProber};
pub use usage::extract_remaining;

/// Probe result type
pub type Result<T> = std::result::Result<T, ProbeError>;
