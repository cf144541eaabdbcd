//! Binds a fresh [`crate::context::RequestContext`] for the lifetime of
//! every inbound request.
//!
//! Runs inside `request_id_middleware` so the request id it reads has
//! already been assigned, and outside `access_middleware` so the access
//! controller can record the resolved identity into the same context.

use axum::{extract::Request, middleware::Next, response::Response};

use crate::api::request_id::RequestId;
use crate::context::{self, RequestContext};

pub async fn context_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();
    let method = req.method().to_string();
    let endpoint = req.uri().path().to_string();

    context::scope(RequestContext::new(request_id, method, endpoint), next.run(req)).await
}
