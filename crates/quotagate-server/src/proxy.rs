//! Request forwarding
//!
//! The `/v1/*` handler: picks the active node, forwards the inbound
//! request with the node's own credentials, and retries against
//! standbys when the node turns out to be drained or unreachable. The
//! inbound body is buffered once so it can be replayed on retry; the
//! upstream response body is streamed back without buffering.

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use quotagate_core::{Node, NodeStatus};
use quotagate_probe::is_connection_error;
use std::collections::HashSet;
use std::sync::Arc;

use crate::app::AppState;

/// Upstream failures reach the proxy at this many consecutive
/// transport errors before the node is taken offline.
const TRANSPORT_OFFLINE_THRESHOLD: u32 = 3;

/// Inbound bodies are buffered for replay across retries; anything
/// larger than this is rejected up front.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{message}")]
    ServiceUnavailable { message: String, details: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::ServiceUnavailable { .. } => "service_unavailable",
            GatewayError::BadRequest(_) => "bad_request",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        let details = match &self {
            GatewayError::ServiceUnavailable { details, .. } => details.clone(),
            _ => String::new(),
        };
        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "details": details,
            }
        });
        (self.status(), axum::Json(body)).into_response()
    }
}

/// Forward a `/v1/*` request through the active node, failing over on
/// quota exhaustion and transport errors. Each node is used at most
/// once per request.
pub async fn proxy_handler(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, GatewayError> {
    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| GatewayError::BadRequest(format!("Failed to read request body: {}", e)))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let registry = state.engine.registry();
    let mut tried: HashSet<String> = HashSet::new();
    let mut attempts = 0usize;
    let mut detours = 0usize;
    let mut last_error: Option<String> = None;

    while attempts < registry.len() {
        let Some(node) = select_node(&state).await else {
            break;
        };

        if tried.contains(&node.id) {
            // The failover search looped back onto a node this request
            // already burned (a post-adoption sync clears its failure
            // gate); push it out of contention and look again. Detours
            // are bounded separately so they cannot cycle forever
            // without costing forward attempts.
            node.force_deprioritize();
            tracing::warn!(id = %node.id, "Re-selected an already-tried node");
            detours += 1;
            if detours > registry.len() {
                break;
            }
            state.engine.failover(None, "node already tried").await;
            continue;
        }
        tried.insert(node.id.clone());
        attempts += 1;

        tracing::debug!(
            id = %node.id,
            attempt = attempts,
            path = %path_and_query,
            "Forwarding request"
        );

        match forward(&state, &node, &parts, body_bytes.clone(), &path_and_query).await {
            Ok(upstream) => {
                let status = upstream.status();

                if is_quota_exhausted(status, upstream.headers()) {
                    tracing::warn!(
                        id = %node.id,
                        status = status.as_u16(),
                        "Upstream reported quota exhaustion mid-request"
                    );
                    last_error = Some(format!(
                        "Node {} exhausted its quota (HTTP {})",
                        node.id,
                        status.as_u16()
                    ));
                    node.set_quota_remaining(0);
                    node.set_status(NodeStatus::Drained);
                    state.engine.failover(None, "quota exhausted").await;
                    continue;
                }

                // Everything else, including 404s and upstream errors
                // that are not quota signals, is the client's to see.
                if status.is_success() {
                    node.record_request_success();
                }
                return relay(upstream);
            }
            Err(err) if is_connection_error(&err) => {
                tracing::warn!(id = %node.id, error = %err, "Upstream unreachable, marking OFFLINE");
                last_error = Some(err.to_string());
                node.set_status(NodeStatus::Offline);
                node.bump_consecutive_failures();
                state.engine.failover(None, "connection error").await;
            }
            Err(err) => {
                last_error = Some(err.to_string());
                node.record_failure();
                tracing::warn!(
                    id = %node.id,
                    failures = node.consecutive_failures(),
                    error = %err,
                    "Transport error forwarding request"
                );
                if node.consecutive_failures() >= TRANSPORT_OFFLINE_THRESHOLD {
                    node.set_status(NodeStatus::Offline);
                }
                state.engine.failover(None, "transport error").await;
            }
        }
    }

    Err(GatewayError::ServiceUnavailable {
        message: "All backend nodes are unavailable".to_string(),
        details: last_error.unwrap_or_else(|| format!("Tried {} node(s)", tried.len())),
    })
}

/// Current active node, or the best replacement failover can find.
async fn select_node(state: &AppState) -> Option<Arc<Node>> {
    if let Some(node) = state.engine.select_active() {
        return Some(node);
    }
    state.engine.failover(None, "no available active node").await
}

/// Quota-exhaustion signals from an upstream response. 402 and 429 are
/// unambiguous; a 403 only counts when the response carries the
/// upstream's quota signature, which [`is_quota_signature`] decides.
fn is_quota_exhausted(status: StatusCode, headers: &reqwest::header::HeaderMap) -> bool {
    status == StatusCode::PAYMENT_REQUIRED
        || status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && is_quota_signature(headers))
}

/// Whether a 403 is a disguised quota error, judged from the response
/// headers. Upstreams also use 403 for org policy and entitlement
/// failures, and draining a node on those would take healthy capacity
/// out of rotation, so until a reliable signature is known this always
/// answers no and the 403 passes through to the client.
fn is_quota_signature(_headers: &reqwest::header::HeaderMap) -> bool {
    false
}

async fn forward(
    state: &AppState,
    node: &Node,
    parts: &axum::http::request::Parts,
    body: bytes::Bytes,
    path_and_query: &str,
) -> Result<reqwest::Response, reqwest::Error> {
    let url = format!(
        "{}{}",
        node.base_url.trim_end_matches('/'),
        path_and_query
    );

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        // Host belongs to the upstream, Authorization is replaced with
        // the node's own token, and Content-Length is recomputed.
        if *name == axum::http::header::HOST
            || *name == axum::http::header::AUTHORIZATION
            || *name == axum::http::header::CONTENT_LENGTH
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(name, value);
        }
    }

    state
        .forward_client
        .request(method, &url)
        .headers(headers)
        .bearer_auth(&node.auth_token)
        .body(body)
        .send()
        .await
}

/// Relay the upstream response, streaming its body through untouched.
fn relay(upstream: reqwest::Response) -> Result<Response<Body>, GatewayError> {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .map_err(|e| GatewayError::Internal(format!("Invalid upstream status: {}", e)))?;

    let mut builder = Response::builder().status(status);
    if let Some(response_headers) = builder.headers_mut() {
        for (name, value) in upstream.headers().iter() {
            // Hop-by-hop headers do not survive re-framing
            if *name == reqwest::header::TRANSFER_ENCODING
                || *name == reqwest::header::CONNECTION
                || *name == reqwest::header::CONTENT_LENGTH
            {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                axum::http::HeaderName::from_bytes(name.as_str().as_bytes()),
                axum::http::HeaderValue::from_bytes(value.as_bytes()),
            ) {
                response_headers.insert(name, value);
            }
        }
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exhaustion_signals() {
        let headers = reqwest::header::HeaderMap::new();
        assert!(is_quota_exhausted(StatusCode::PAYMENT_REQUIRED, &headers));
        assert!(is_quota_exhausted(StatusCode::TOO_MANY_REQUESTS, &headers));
        // 403 passes through until a header signature is wired up
        assert!(!is_quota_exhausted(StatusCode::FORBIDDEN, &headers));
        assert!(!is_quota_exhausted(StatusCode::NOT_FOUND, &headers));
        assert!(!is_quota_exhausted(
            StatusCode::INTERNAL_SERVER_ERROR,
            &headers
        ));
    }

    #[test]
    fn test_error_envelope_shape() {
        let err = GatewayError::ServiceUnavailable {
            message: "All backend nodes are unavailable".to_string(),
            details: "Tried 3 node(s)".to_string(),
        };
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_type(), "service_unavailable");
    }
}
