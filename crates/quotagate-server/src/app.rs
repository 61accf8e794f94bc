//! HTTP surface
//!
//! Router assembly plus the two control-plane endpoints: `/health`
//! reports pool state, `/admin/reset-active-node` force-adopts the
//! best node regardless of failure gates. Everything under `/v1/` is
//! handled by the proxy.

use axum::Router;
use axum::extract::State;
use axum::routing::{any, get, post};
use chrono::{DateTime, Utc};
use quotagate_core::NodeStatus;
use quotagate_routing::FailoverEngine;
use serde::Serialize;

use crate::proxy::{GatewayError, proxy_handler};

#[derive(Clone)]
pub struct AppState {
    pub engine: FailoverEngine,
    /// Long-timeout client used only for forwarded requests; probes
    /// use the prober's own short-timeout client.
    pub forward_client: reqwest::Client,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/admin/reset-active-node", post(reset_active_handler))
        .route("/v1/{*path}", any(proxy_handler))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    mode: &'static str,
    active_node_index: Option<usize>,
    active_node_id: Option<String>,
    available_node_count: usize,
    total_node_count: usize,
    nodes: Vec<NodeHealth>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeHealth {
    id: String,
    status: NodeStatus,
    quota: i64,
    is_active: bool,
    consecutive_failures: u32,
    last_check: Option<DateTime<Utc>>,
    last_healthy: Option<DateTime<Utc>>,
}

async fn health_handler(State(state): State<AppState>) -> axum::Json<HealthResponse> {
    let registry = state.engine.registry();
    let nodes = registry.snapshot();
    let active_index = registry.active_index();
    let available = registry.available_count();

    let node_reports = nodes
        .iter()
        .enumerate()
        .map(|(index, node)| {
            let snap = node.snapshot();
            NodeHealth {
                id: snap.id,
                status: snap.status,
                quota: snap.quota_remaining,
                is_active: index == active_index,
                consecutive_failures: snap.consecutive_failures,
                last_check: snap.last_checked_at,
                last_healthy: snap.last_healthy_at,
            }
        })
        .collect();

    let active_node_id = nodes.get(active_index).map(|n| n.id.clone());

    axum::Json(HealthResponse {
        status: if available > 0 { "ok" } else { "degraded" },
        mode: "active-standby",
        active_node_index: if nodes.is_empty() {
            None
        } else {
            Some(active_index)
        },
        active_node_id,
        available_node_count: available,
        total_node_count: nodes.len(),
        nodes: node_reports,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetResponse {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_node_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_node_id: Option<String>,
}

async fn reset_active_handler(
    State(state): State<AppState>,
) -> Result<axum::Json<ResetResponse>, GatewayError> {
    match state.engine.reset_active() {
        Some((index, node)) => {
            tracing::info!(id = %node.id, index, "Active node reset via admin endpoint");
            Ok(axum::Json(ResetResponse {
                success: true,
                message: format!("Active node reset to {}", node.id),
                active_node_index: Some(index),
                active_node_id: Some(node.id.clone()),
            }))
        }
        None => Err(GatewayError::ServiceUnavailable {
            message: "No READY node with remaining quota".to_string(),
            details: "Reset requires at least one READY node with quota left".to_string(),
        }),
    }
}
