//! Admin API (port `admin_port`) — operator-facing introspection and
//! router/provider CRUD, backed directly by the Model Registry (C4).
//!
//! These endpoints are separated onto a different port so they can be
//! network-restricted independently of the client API (e.g. accessible only
//! from the internal Docker network, never exposed to the internet).
//!
//! Role/user/token/organization CRUD is out of scope — callers are
//! authenticated with a single shared bearer token (`admin_auth_middleware`),
//! not per-operator identities.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::backends::ProviderClient;
use crate::registry::{Provider, Router as RegistryRouter};
use crate::state::GatewayState;

/// Build the admin-facing axum router (port `admin_port`).
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/admin/health", get(health))
        .route("/metrics", get(crate::api::metrics::metrics))
        .route("/admin/traffic", get(traffic))
        .route("/admin/config", get(config))
        .route("/admin/providers/health", get(providers_health))
        .route("/admin/routers", get(list_routers).post(put_router))
        .route("/admin/routers/{id}", delete(remove_router))
        .route("/admin/providers", get(list_providers).post(put_provider))
        .route("/admin/providers/{id}", delete(remove_provider))
        .with_state(state)
}

/// GET /admin/health — liveness plus catalogue size.
pub async fn health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let registry = state.registry();
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "routers": registry.list_routers().len(),
        "providers": registry.list_providers().len(),
    }))
}

#[derive(Deserialize)]
pub struct TrafficQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}
fn default_limit() -> usize {
    100
}

/// GET /admin/traffic?limit=N — recent N traffic entries (default 100)
pub async fn traffic(State(state): State<Arc<GatewayState>>, Query(q): Query<TrafficQuery>) -> impl IntoResponse {
    let entries = state.traffic.recent(q.limit).await;
    let stats = state.traffic.stats().await;
    Json(json!({
        "stats": stats,
        "entries": entries,
    }))
}

/// GET /admin/config — current settings and catalogue with secrets redacted.
pub async fn config(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let cfg = state.config();
    let registry = state.registry();

    let providers: Vec<_> = registry
        .list_providers()
        .into_iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "kind": p.kind,
                "base_url": p.base_url,
                "api_key_env": p.api_key_env,
                "model_name": p.model_name,
            })
        })
        .collect();

    let routers: Vec<_> = registry
        .list_routers()
        .into_iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "aliases": r.aliases,
                "router_type": r.router_type,
                "load_balancing_strategy": r.load_balancing_strategy,
                "load_balancing_metric": r.load_balancing_metric,
                "provider_ids": r.provider_ids,
            })
        })
        .collect();

    Json(json!({
        "settings": {
            "client_port": cfg.settings.client_port,
            "admin_port": cfg.settings.admin_port,
            "traffic_log_capacity": cfg.settings.traffic_log_capacity,
            "queue_mode": cfg.settings.queue_mode,
            "rate_limit_strategy": cfg.settings.rate_limit_strategy,
        },
        "providers": providers,
        "routers": routers,
    }))
}

/// GET /admin/providers/health — probe every configured provider.
pub async fn providers_health(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let registry = state.registry();
    let mut results = Vec::new();

    for provider in registry.list_providers() {
        let client = match ProviderClient::new(&provider) {
            Ok(c) => c,
            Err(e) => {
                results.push(json!({
                    "provider": provider.name,
                    "status": "error",
                    "error": e.to_string(),
                }));
                continue;
            }
        };

        match client.health_check().await {
            Ok(_) => results.push(json!({ "provider": provider.name, "status": "ok" })),
            Err(e) => results.push(json!({
                "provider": provider.name,
                "status": "unreachable",
                "error": e.to_string(),
            })),
        }
    }

    let all_ok = results.iter().all(|r| r["status"] == "ok");
    let status = if all_ok { StatusCode::OK } else { StatusCode::MULTI_STATUS };

    (status, Json(json!({ "providers": results })))
}

/// GET /admin/routers
pub async fn list_routers(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.registry().list_routers())
}

/// POST /admin/routers — insert or replace a router by id.
pub async fn put_router(
    State(state): State<Arc<GatewayState>>,
    Json(router): Json<RegistryRouter>,
) -> impl IntoResponse {
    match state.registry().put_router(router) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))).into_response(),
        Err(e) => e.into_response(),
    }
}

/// DELETE /admin/routers/:id
pub async fn remove_router(State(state): State<Arc<GatewayState>>, Path(id): Path<u64>) -> impl IntoResponse {
    state.registry().remove_router(id);
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// GET /admin/providers
pub async fn list_providers(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.registry().list_providers())
}

/// POST /admin/providers — insert or replace a provider by id.
pub async fn put_provider(State(state): State<Arc<GatewayState>>, Json(provider): Json<Provider>) -> impl IntoResponse {
    state.registry().put_provider(provider);
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// DELETE /admin/providers/:id
pub async fn remove_provider(State(state): State<Arc<GatewayState>>, Path(id): Path<u64>) -> impl IntoResponse {
    state.registry().remove_provider(id);
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}
