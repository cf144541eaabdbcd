//! Access Controller middleware (C8) for the client-facing API.
//!
//! Resolves the `Authorization` header to a caller identity via
//! [`crate::access::AccessController`] and publishes it as an
//! [`AuthenticatedUser`] extension (pulled out by handlers through the
//! extractor already implemented on that type) plus the caller's
//! per-router token limits as [`TokenLimits`]. Permission checks and
//! rate-limit enforcement happen in the handlers themselves, since both are
//! endpoint-specific (which permission is required, whether the endpoint
//! carries prompt tokens) rather than generic across every route.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::access::AuthenticatedUser;
use crate::limiter::RouterLimits;
use crate::state::GatewayState;

/// The caller's per-router limits, as carried by their token (or empty for
/// the master user, who bypasses the limiter entirely).
#[derive(Clone, Debug)]
pub struct TokenLimits(pub HashMap<u64, RouterLimits>);

pub async fn access_middleware(State(state): State<Arc<GatewayState>>, mut req: Request, next: Next) -> Response {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match state.access.authenticate(header_value.as_deref()) {
        Ok((user, limits)) => {
            req.extensions_mut().insert(AuthenticatedUser(user));
            req.extensions_mut().insert(TokenLimits(limits));
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    use crate::access::AuthenticatedUser;
    use crate::config::{Config, Settings};
    use crate::state::GatewayState;
    use crate::traffic::TrafficLog;

    fn test_state() -> Arc<GatewayState> {
        let env_var = "LMG_TEST_ACCESS_SIGNING_KEY";
        unsafe { std::env::set_var(env_var, "test-secret") };
        let config = Config {
            settings: Settings {
                client_port: 8080,
                admin_port: 8081,
                traffic_log_capacity: 10,
                log_level: None,
                rate_limit_rpm: None,
                admin_token_env: None,
                token_signing_key_env: env_var.to_string(),
                master_key_env: None,
                queue_mode: Default::default(),
                queue_workers: 1,
                max_retries: 1,
                retry_countdown_ms: 10,
                rate_limit_strategy: crate::limiter::WindowStrategy::Fixed,
                metric_retention_secs: 60,
                max_body_bytes: 1024,
            },
            providers: vec![],
            routers: vec![],
        };
        Arc::new(GatewayState::new(config, std::path::PathBuf::default(), Arc::new(TrafficLog::new(10))).unwrap())
    }

    async fn echo_user(Extension(AuthenticatedUser(user)): axum::Extension<AuthenticatedUser>) -> String {
        user.id.to_string()
    }
    use axum::Extension;

    fn app(state: Arc<GatewayState>) -> Router {
        Router::new()
            .route("/", get(echo_user))
            .layer(middleware::from_fn_with_state(state.clone(), super::access_middleware))
            .with_state(state)
    }

    #[tokio::test]
    async fn missing_authorization_header_is_forbidden() {
        let resp = app(test_state())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn valid_jwt_injects_authenticated_user() {
        use jsonwebtoken::{encode, EncodingKey, Header};

        let claims = crate::access::TokenClaims {
            user_id: 42,
            token_id: 1,
            exp: chrono::Utc::now().timestamp() + 3600,
            permissions: vec!["chat".to_string()],
            limits: Default::default(),
        };
        let jwt = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();

        let resp = app(test_state())
            .oneshot(
                Request::get("/")
                    .header("authorization", format!("Bearer {jwt}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), 256).await.unwrap();
        assert_eq!(&body[..], b"42");
    }
}
