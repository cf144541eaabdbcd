//! Public status endpoint (`GET /status`, client port).
//!
//! Safe to expose publicly without authentication.
//! Returns gateway liveness and aggregate metrics only.
//!
//! What this endpoint **does not** include:
//! - Provider names or base URLs
//! - Router or model names
//! - Routing configuration
//! - Any value that could reveal internal infrastructure
//!
//! This endpoint is enabled by default and intended to be the one public
//! window into the gateway's health. Deeper introspection lives behind the
//! admin API on a separate, firewalled port.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

use crate::state::GatewayState;

/// `GET /status` — public liveness and metrics endpoint.
///
/// Example response:
/// ```json
/// {
///   "status": "ok",
///   "ready": true,
///   "uptime_secs": 3600,
///   "requests": {
///     "total": 1024,
///     "errors": 3,
///     "error_rate": 0.003,
///     "avg_latency_ms": 87.4
///   }
/// }
/// ```
///
/// `ready` is `false` when one or more providers have `api_key_env`
/// configured but the environment variable is not set or is empty. No
/// provider names are exposed — only the boolean. When `ready: false` a
/// `setup_url` field is included pointing to the setup documentation.
pub async fn status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();
    let stats = state.traffic.stats().await;
    let error_rate = if stats.total_requests == 0 {
        0.0_f64
    } else {
        stats.error_count as f64 / stats.total_requests as f64
    };

    // Count providers that require a key but don't have one resolved.
    // We expose the count, not the names, to avoid leaking config detail.
    let unconfigured = state
        .registry()
        .list_providers()
        .iter()
        .filter(|p| p.api_key_env.is_some() && p.api_key().map(|k| k.is_empty()).unwrap_or(true))
        .count();
    let ready = unconfigured == 0;

    let mut body = json!({
        "status": "ok",
        "ready": ready,
        "uptime_secs": uptime_secs,
        "requests": {
            "total": stats.total_requests,
            "errors": stats.error_count,
            "error_rate": error_rate,
            "avg_latency_ms": stats.avg_latency_ms,
        }
    });

    if !ready {
        body["setup_url"] = serde_json::Value::String(
            "https://github.com/electricessence/lm-gateway-rs/blob/main/docs/setup.md".to_string(),
        );
    }

    Json(body)
}
