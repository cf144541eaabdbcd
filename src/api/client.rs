//! Client-facing API: the OpenAI-compatible surface callers talk to.
//!
//! Every handler follows the same pipeline: C8 identity/limits (already
//! published into request extensions by `access_middleware`) → C4 resolve →
//! C2 enforce → C7 dispatch (select+admit a provider) → C3 forward → C9
//! record usage. Handlers differ only in request/response shaping per
//! endpoint.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream;
use serde_json::{json, Value};

use crate::access::AuthenticatedUser;
use crate::api::access::TokenLimits;
use crate::backends::{timed_chat_completions, InflightGuard, ProviderClient};
use crate::context::{self, Usage};
use crate::error::{AppError, ErrorKind};
use crate::limiter::{check_user_limits, RouterLimits};
use crate::metrics::names;
use crate::registry::{Provider, Router as RegistryRouter};
use crate::state::GatewayState;
use crate::traffic::TrafficEntry;
use crate::usage::Pricing;

pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(crate::api::health::healthz))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/embeddings", post(embeddings))
        .route("/v1/rerank", post(rerank))
        .route("/v1/audio/transcriptions", post(audio_transcriptions))
        .route("/v1/ocr", post(ocr))
        .route("/v1/parse", post(parse))
        .route("/v1/models", get(list_models))
        .route("/status", get(crate::api::status::status))
        .with_state(state)
}

/// The caller's effective limits for `router_id`: the token's own carried
/// limit takes precedence (it is what the operator issued this specific key
/// for); absent that, fall back to the router's own admin-configured
/// per-user table; absent both, the caller is unlimited on this router.
fn effective_limits(token_limits: &TokenLimits, router: &RegistryRouter, user_id: u64) -> RouterLimits {
    token_limits
        .0
        .get(&router.id)
        .copied()
        .or_else(|| router.limits.get(&user_id).copied())
        .unwrap_or_default()
}

/// Resolve `model`, enforce the caller's limits, and dispatch to an admitted
/// provider — the C4→C2→C7 prefix every endpoint shares.
async fn resolve_and_dispatch(
    state: &GatewayState,
    user: &crate::context::UserInfo,
    token_limits: &TokenLimits,
    model: &str,
    prompt_tokens: Option<u64>,
) -> Result<(RegistryRouter, Provider, ProviderClient), AppError> {
    let registry = state.registry();
    let router = registry.resolve(model)?;
    let limits = effective_limits(token_limits, &router, user.id);
    check_user_limits(&state.user_limiter, user.id, router.id, &limits, prompt_tokens)?;

    let provider_id = state
        .dispatcher
        .dispatch(&router, &registry, &state.metric_store, 0)
        .await?;
    let provider = registry.provider(provider_id)?;
    let client = ProviderClient::new(&provider).map_err(|e| AppError::with_source(ErrorKind::Internal(e.to_string()), e))?;
    Ok((router, provider, client))
}

fn pricing_for(router: &RegistryRouter) -> Pricing {
    Pricing {
        cost_prompt_tokens: router.cost_prompt_tokens,
        cost_completion_tokens: router.cost_completion_tokens,
    }
}

/// Record usage into the active `RequestContext` (when bound) and push a
/// `TrafficEntry`. Called from every non-streaming handler after a
/// successful upstream call.
async fn record_completion(
    state: &GatewayState,
    router: &RegistryRouter,
    provider: &Provider,
    user_id: u64,
    endpoint: &str,
    model: &str,
    prompt_tokens: u64,
    completion_tokens: u64,
    latency_ms: u64,
    success: bool,
    error: Option<&str>,
) {
    let mut usage = Usage::default();
    crate::usage::record(&mut usage, provider, pricing_for(router), prompt_tokens, completion_tokens, latency_ms);

    if success && completion_tokens > 0 && latency_ms > 0 {
        let perf = latency_ms as f64 / completion_tokens as f64;
        state.metric_store.ts_add(names::PERFORMANCE, provider.id, perf).await;
    }

    let request_id = context::try_with_current(|ctx| {
        ctx.router_id = Some(router.id);
        ctx.router_name = Some(router.name.clone());
        ctx.provider_id = Some(provider.id);
        ctx.provider_name = Some(provider.name.clone());
        ctx.usage = usage.clone();
        ctx.latency_ms = Some(latency_ms);
        ctx.request_id.clone()
    })
    .unwrap_or_default();

    let mut entry = TrafficEntry::new(request_id, endpoint.to_string(), router.name.clone(), provider.name.clone(), latency_ms, success)
        .with_requested_model(model)
        .with_user_id(user_id)
        .with_usage(usage);
    if let Some(err) = error {
        entry = entry.with_error(err);
    }
    state.traffic.push(entry);
}

fn model_name_from(body: &Value) -> Result<String, AppError> {
    body.get("model")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ErrorKind::RequestFormatFailed.into())
}

fn upstream_to_app_error(e: anyhow::Error) -> AppError {
    AppError::with_source(ErrorKind::UpstreamOverloaded, e)
}

/// POST /v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    axum::Extension(AuthenticatedUser(user)): axum::Extension<AuthenticatedUser>,
    axum::Extension(token_limits): axum::Extension<TokenLimits>,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let parsed = crate::access::parse_json_body(&body);
    let body = Value::Object(parsed);
    let model = model_name_from(&body)?;
    let prompt_tokens = crate::usage::prompt_tokens_for_chat(&state.tokenizer, &body);

    let (router, provider, client) = resolve_and_dispatch(&state, &user, &token_limits, &model, Some(prompt_tokens)).await?;

    let mut upstream_request = body.clone();
    if let Some(obj) = upstream_request.as_object_mut() {
        obj.insert("model".into(), json!(provider.model_name));
    }

    let is_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    if is_stream {
        stream_chat_completions(state, user.id, router, provider, client, upstream_request, model, prompt_tokens).await
    } else {
        let (result, timing) = timed_chat_completions(&client, &state.metric_store, provider.id, upstream_request).await;
        match result {
            Ok(mut resp) => {
                let completion_text = resp
                    .pointer("/choices/0/message/content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let completion_tokens = state.tokenizer.completion_tokens_from_text(&completion_text);

                record_completion(
                    &state, &router, &provider, user.id, "/v1/chat/completions", &model,
                    prompt_tokens, completion_tokens, timing.latency_ms, true, None,
                ).await;

                if let Some(obj) = resp.as_object_mut() {
                    obj.insert("model".into(), json!(router.name));
                }
                Ok((StatusCode::OK, Json(resp)).into_response())
            }
            Err(e) => {
                record_completion(
                    &state, &router, &provider, user.id, "/v1/chat/completions", &model,
                    prompt_tokens, 0, timing.latency_ms, false, Some(&e.to_string()),
                ).await;
                Err(upstream_to_app_error(e))
            }
        }
    }
}

/// Forward an SSE chat stream, tracking TTFT and accumulating completion
/// text so the synthetic final usage chunk can be emitted before `[DONE]`.
/// Per-chunk state lives in the `stream::unfold` accumulator rather than the
/// request's `RequestContext`, since the body stream is polled by the
/// server after the handler (and its task-local scope) has already returned.
async fn stream_chat_completions(
    state: Arc<GatewayState>,
    user_id: u64,
    router: RegistryRouter,
    provider: Provider,
    client: ProviderClient,
    request: Value,
    requested_model: String,
    prompt_tokens: u64,
) -> Result<Response, AppError> {
    let inner = client
        .chat_completions_stream(request)
        .await
        .map_err(upstream_to_app_error)?;

    let guard = InflightGuard::acquire(state.metric_store.clone(), provider.id).await;
    let st = ChatStreamState {
        inner,
        buf: Vec::new(),
        pending: std::collections::VecDeque::new(),
        start: Instant::now(),
        first_token_at: None,
        completion_text: String::new(),
        terminated: false,
        guard: Some(guard),
    };

    let metric_store = state.metric_store.clone();
    let traffic = state.traffic.clone();
    let tokenizer = state.tokenizer.clone();
    let pricing = pricing_for(&router);
    let router_name = router.name.clone();
    let provider = provider.clone();
    let request_id = context::try_with_current(|ctx| ctx.request_id.clone()).unwrap_or_default();

    let body_stream = stream::unfold(st, move |mut s| {
        let metric_store = metric_store.clone();
        let traffic = traffic.clone();
        let tokenizer = tokenizer.clone();
        let pricing = pricing;
        let router_name = router_name.clone();
        let provider = provider.clone();
        let request_id = request_id.clone();
        let requested_model = requested_model.clone();

        async move {
            loop {
                if let Some(frame) = s.pending.pop_front() {
                    return Some((Ok::<_, std::io::Error>(frame), s));
                }
                if s.terminated {
                    return None;
                }

                use futures_util::StreamExt as _;
                match s.inner.next().await {
                    Some(Ok(chunk)) => {
                        s.buf.extend_from_slice(&chunk);
                        while let Some(pos) = find_frame_boundary(&s.buf) {
                            let frame: Vec<u8> = s.buf.drain(..pos).collect();
                            drain_separator(&mut s.buf);
                            process_frame(&frame, &mut s);
                        }
                    }
                    Some(Err(e)) => {
                        s.terminated = true;
                        let msg = json!({"error": {"message": e.to_string(), "type": "upstream_overloaded"}});
                        s.pending.push_back(bytes::Bytes::from(format!("data: {msg}\n\n")));
                        continue;
                    }
                    None => {
                        if !s.buf.is_empty() {
                            let frame = std::mem::take(&mut s.buf);
                            process_frame(&frame, &mut s);
                        }
                        finalize_stream(
                            &mut s, &metric_store, &traffic, &tokenizer, &provider, pricing,
                            &router_name, &request_id, user_id, &requested_model, prompt_tokens,
                        );
                        s.terminated = true;
                    }
                }
            }
        }
    });

    Ok(axum::body::Body::from_stream(body_stream).into_response())
}

fn find_frame_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn drain_separator(buf: &mut Vec<u8>) {
    while buf.first() == Some(&b'\n') {
        buf.remove(0);
    }
}

struct ChatStreamState {
    inner: crate::backends::SseStream,
    buf: Vec<u8>,
    pending: std::collections::VecDeque<bytes::Bytes>,
    start: Instant,
    first_token_at: Option<Instant>,
    completion_text: String,
    terminated: bool,
    guard: Option<InflightGuard>,
}

fn process_frame(frame: &[u8], s: &mut ChatStreamState) {
    let text = String::from_utf8_lossy(frame);
    let Some(data) = text.strip_prefix("data: ").or_else(|| text.strip_prefix("data:")) else {
        s.pending.push_back(bytes::Bytes::from(format!("{text}\n\n")));
        return;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return;
    }

    if let Ok(v) = serde_json::from_str::<Value>(data) {
        if let Some(delta) = v.pointer("/choices/0/delta/content").and_then(Value::as_str) {
            if !delta.is_empty() {
                if s.first_token_at.is_none() {
                    s.first_token_at = Some(Instant::now());
                }
                s.completion_text.push_str(delta);
            }
        }
    }

    s.pending.push_back(bytes::Bytes::from(format!("{text}\n\n")));
}

/// Compute final usage/latency/TTFT, queue the synthetic usage chunk and
/// `[DONE]` terminator onto `s.pending`, then hand metric/traffic-log writes
/// off to a detached task so the stream doesn't block its last two frames
/// on them.
#[allow(clippy::too_many_arguments)]
fn finalize_stream(
    s: &mut ChatStreamState,
    metric_store: &Arc<dyn crate::metrics::MetricStore>,
    traffic: &Arc<crate::traffic::TrafficLog>,
    tokenizer: &crate::tokenizer::Tokenizer,
    provider: &Provider,
    pricing: Pricing,
    router_name: &str,
    request_id: &str,
    user_id: u64,
    requested_model: &str,
    prompt_tokens: u64,
) {
    let latency_ms = s.start.elapsed().as_millis() as u64;
    let completion_text = std::mem::take(&mut s.completion_text);
    let completion_tokens = tokenizer.completion_tokens_from_text(&completion_text);
    let ttft_ms = s.first_token_at.map(|t| t.duration_since(s.start).as_millis() as u64);

    let mut usage = Usage::default();
    crate::usage::record(&mut usage, provider, pricing, prompt_tokens, completion_tokens, latency_ms);

    let final_chunk = json!({
        "id": request_id,
        "model": router_name,
        "object": "chat.completion.chunk",
        "choices": [],
        "usage": usage,
    });
    s.pending.push_back(bytes::Bytes::from(format!("data: {final_chunk}\n\n")));
    s.pending.push_back(bytes::Bytes::from_static(b"data: [DONE]\n\n"));

    let store = metric_store.clone();
    let traffic = traffic.clone();
    let provider = provider.clone();
    let router_name = router_name.to_string();
    let request_id = request_id.to_string();
    let requested_model = requested_model.to_string();

    tokio::spawn(async move {
        store.ts_add(names::LATENCY, provider.id, latency_ms as f64).await;
        if let Some(ttft) = ttft_ms {
            store.ts_add(names::TTFT, provider.id, ttft as f64).await;
        }
        if completion_tokens > 0 && latency_ms > 0 {
            store.ts_add(names::PERFORMANCE, provider.id, latency_ms as f64 / completion_tokens as f64).await;
        }

        let mut entry = TrafficEntry::new(request_id, "/v1/chat/completions".into(), router_name, provider.name.clone(), latency_ms, true)
            .with_requested_model(&requested_model)
            .with_user_id(user_id)
            .with_usage(usage);
        if let Some(t) = ttft_ms {
            entry = entry.with_ttft_ms(t);
        }
        traffic.push(entry);
    });

    s.guard.take();
}

/// POST /v1/completions — no dedicated upstream adapter exists for the
/// legacy completions shape, so the body is forwarded through the same
/// chat-completions call every OpenAI-compatible backend also exposes it
/// through.
pub async fn completions(
    State(state): State<Arc<GatewayState>>,
    axum::Extension(AuthenticatedUser(user)): axum::Extension<AuthenticatedUser>,
    axum::Extension(token_limits): axum::Extension<TokenLimits>,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let parsed = crate::access::parse_json_body(&body);
    let body = Value::Object(parsed);
    let model = model_name_from(&body)?;
    let prompt_tokens = state.tokenizer.prompt_tokens_from_input(&body);

    let (router, provider, client) = resolve_and_dispatch(&state, &user, &token_limits, &model, Some(prompt_tokens)).await?;

    let mut upstream_request = body;
    if let Some(obj) = upstream_request.as_object_mut() {
        obj.insert("model".into(), json!(provider.model_name));
    }

    let (result, timing) = timed_chat_completions(&client, &state.metric_store, provider.id, upstream_request).await;
    match result {
        Ok(mut resp) => {
            let completion_text = resp.pointer("/choices/0/text").and_then(Value::as_str).unwrap_or_default().to_string();
            let completion_tokens = state.tokenizer.completion_tokens_from_text(&completion_text);
            record_completion(&state, &router, &provider, user.id, "/v1/completions", &model, prompt_tokens, completion_tokens, timing.latency_ms, true, None).await;
            if let Some(obj) = resp.as_object_mut() {
                obj.insert("model".into(), json!(router.name));
            }
            Ok((StatusCode::OK, Json(resp)).into_response())
        }
        Err(e) => {
            record_completion(&state, &router, &provider, user.id, "/v1/completions", &model, prompt_tokens, 0, timing.latency_ms, false, Some(&e.to_string())).await;
            Err(upstream_to_app_error(e))
        }
    }
}

/// POST /v1/embeddings
pub async fn embeddings(
    State(state): State<Arc<GatewayState>>,
    axum::Extension(AuthenticatedUser(user)): axum::Extension<AuthenticatedUser>,
    axum::Extension(token_limits): axum::Extension<TokenLimits>,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let parsed = crate::access::parse_json_body(&body);
    let body = Value::Object(parsed);
    let model = model_name_from(&body)?;
    let prompt_tokens = state.tokenizer.prompt_tokens_from_input(&body);

    let (router, provider, client) = resolve_and_dispatch(&state, &user, &token_limits, &model, Some(prompt_tokens)).await?;

    let mut upstream_request = body;
    if let Some(obj) = upstream_request.as_object_mut() {
        obj.insert("model".into(), json!(provider.model_name));
    }

    let _guard = InflightGuard::acquire(state.metric_store.clone(), provider.id).await;
    let start = Instant::now();
    let result = client.embeddings(upstream_request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    state.metric_store.ts_add(names::LATENCY, provider.id, latency_ms as f64).await;

    match result {
        Ok(mut resp) => {
            record_completion(&state, &router, &provider, user.id, "/v1/embeddings", &model, prompt_tokens, 0, latency_ms, true, None).await;
            if let Some(obj) = resp.as_object_mut() {
                obj.insert("model".into(), json!(router.name));
            }
            Ok((StatusCode::OK, Json(resp)).into_response())
        }
        Err(e) => {
            record_completion(&state, &router, &provider, user.id, "/v1/embeddings", &model, prompt_tokens, 0, latency_ms, false, Some(&e.to_string())).await;
            Err(upstream_to_app_error(e))
        }
    }
}

/// POST /v1/rerank
pub async fn rerank(
    State(state): State<Arc<GatewayState>>,
    axum::Extension(AuthenticatedUser(user)): axum::Extension<AuthenticatedUser>,
    axum::Extension(token_limits): axum::Extension<TokenLimits>,
    body: axum::body::Bytes,
) -> Result<Response, AppError> {
    let parsed = crate::access::parse_json_body(&body);
    let body = Value::Object(parsed);
    let model = model_name_from(&body)?;
    let query = body.get("query").and_then(Value::as_str).unwrap_or_default().to_string();
    let documents: Vec<String> = body
        .get("documents")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();

    let (router, provider, client) = resolve_and_dispatch(&state, &user, &token_limits, &model, None).await?;

    let _guard = InflightGuard::acquire(state.metric_store.clone(), provider.id).await;
    let start = Instant::now();
    let result = client.rerank(query, documents).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    state.metric_store.ts_add(names::LATENCY, provider.id, latency_ms as f64).await;

    match result {
        Ok(resp) => {
            record_completion(&state, &router, &provider, user.id, "/v1/rerank", &model, 0, 0, latency_ms, true, None).await;
            Ok((StatusCode::OK, Json(resp)).into_response())
        }
        Err(e) => {
            record_completion(&state, &router, &provider, user.id, "/v1/rerank", &model, 0, 0, latency_ms, false, Some(&e.to_string())).await;
            Err(upstream_to_app_error(e))
        }
    }
}

/// Shared body for the generic JSON-in/JSON-out endpoints that have no
/// bespoke upstream translation: transcription, OCR, and parsing all
/// forward the parsed request body through the provider's chat-completions
/// call, same as `completions`. Uploaded file bytes are not forwarded
/// upstream on this generic path — only their metadata — since there is no
/// unified wire shape for file content across providers.
async fn generic_json_endpoint(
    state: Arc<GatewayState>,
    user: crate::context::UserInfo,
    token_limits: TokenLimits,
    endpoint: &'static str,
    mut body: serde_json::Map<String, Value>,
    files: Vec<crate::access::FilePart>,
) -> Result<Response, AppError> {
    if let Some(file) = files.into_iter().next() {
        if let Some(name) = file.file_name {
            body.insert("file_name".into(), json!(name));
        }
        if let Some(content_type) = file.content_type {
            body.insert("file_content_type".into(), json!(content_type));
        }
    }
    let body = Value::Object(body);
    let model = model_name_from(&body)?;

    let (router, provider, client) = resolve_and_dispatch(&state, &user, &token_limits, &model, None).await?;

    let mut upstream_request = body;
    if let Some(obj) = upstream_request.as_object_mut() {
        obj.insert("model".into(), json!(provider.model_name));
    }

    let (result, timing) = timed_chat_completions(&client, &state.metric_store, provider.id, upstream_request).await;
    match result {
        Ok(mut resp) => {
            record_completion(&state, &router, &provider, user.id, endpoint, &model, 0, 0, timing.latency_ms, true, None).await;
            if let Some(obj) = resp.as_object_mut() {
                obj.insert("model".into(), json!(router.name));
            }
            Ok((StatusCode::OK, Json(resp)).into_response())
        }
        Err(e) => {
            record_completion(&state, &router, &provider, user.id, endpoint, &model, 0, 0, timing.latency_ms, false, Some(&e.to_string())).await;
            Err(upstream_to_app_error(e))
        }
    }
}

/// Parse a request body that may be plain JSON or `multipart/form-data`,
/// pulling the caller identity out of the extensions axum's `Request` still
/// carries before the body is consumed.
async fn parse_request_body(
    req: Request,
) -> Result<(crate::context::UserInfo, TokenLimits, serde_json::Map<String, Value>, Vec<crate::access::FilePart>), AppError> {
    let user = req
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or(AppError::from(ErrorKind::AuthScheme))?
        .0;
    let token_limits = req
        .extensions()
        .get::<TokenLimits>()
        .cloned()
        .ok_or(AppError::from(ErrorKind::AuthScheme))?;

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|_| AppError::from(ErrorKind::RequestFormatFailed))?;
        let parsed = crate::access::parse_multipart_body(multipart).await?;
        Ok((user, token_limits, parsed.json, parsed.files))
    } else {
        let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
            .await
            .map_err(|_| AppError::from(ErrorKind::RequestFormatFailed))?;
        Ok((user, token_limits, crate::access::parse_json_body(&bytes), Vec::new()))
    }
}

/// POST /v1/audio/transcriptions — JSON or multipart form upload.
pub async fn audio_transcriptions(State(state): State<Arc<GatewayState>>, req: Request) -> Result<Response, AppError> {
    let (user, token_limits, json, files) = parse_request_body(req).await?;
    generic_json_endpoint(state, user, token_limits, "/v1/audio/transcriptions", json, files).await
}

/// POST /v1/ocr
pub async fn ocr(State(state): State<Arc<GatewayState>>, req: Request) -> Result<Response, AppError> {
    let (user, token_limits, json, files) = parse_request_body(req).await?;
    generic_json_endpoint(state, user, token_limits, "/v1/ocr", json, files).await
}

/// POST /v1/parse
pub async fn parse(State(state): State<Arc<GatewayState>>, req: Request) -> Result<Response, AppError> {
    let (user, token_limits, json, files) = parse_request_body(req).await?;
    generic_json_endpoint(state, user, token_limits, "/v1/parse", json, files).await
}

/// GET /v1/models — every router visible to the caller, listed by name with
/// its aliases as additional model entries.
pub async fn list_models(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let registry = state.registry();
    let mut data = Vec::new();
    for router in registry.list_routers() {
        data.push(json!({
            "id": router.name,
            "object": "model",
            "owned_by": "lm-gateway",
        }));
        for alias in &router.aliases {
            data.push(json!({
                "id": alias,
                "object": "model",
                "owned_by": "lm-gateway",
                "resolves_to": router.name,
            }));
        }
    }
    Json(json!({ "object": "list", "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limits_prefers_token_carried_limit() {
        let mut token_limits = TokenLimits(Default::default());
        token_limits.0.insert(1, RouterLimits { rpm: Some(10), ..Default::default() });
        let mut router = sample_router();
        router.limits.insert(7, RouterLimits { rpm: Some(99), ..Default::default() });

        let limits = effective_limits(&token_limits, &router, 7);
        assert_eq!(limits.rpm, Some(10));
    }

    #[test]
    fn effective_limits_falls_back_to_router_table() {
        let token_limits = TokenLimits(Default::default());
        let mut router = sample_router();
        router.limits.insert(7, RouterLimits { rpm: Some(5), ..Default::default() });

        let limits = effective_limits(&token_limits, &router, 7);
        assert_eq!(limits.rpm, Some(5));
    }

    #[test]
    fn effective_limits_unlimited_when_neither_set() {
        let token_limits = TokenLimits(Default::default());
        let router = sample_router();
        let limits = effective_limits(&token_limits, &router, 7);
        assert_eq!(limits.rpm, None);
    }

    fn sample_router() -> RegistryRouter {
        RegistryRouter {
            id: 1,
            name: "fast".into(),
            aliases: vec![],
            router_type: crate::registry::RouterType::TextGeneration,
            load_balancing_strategy: crate::balancer::LoadBalancingStrategy::Shuffle,
            load_balancing_metric: crate::qos::QosMetric::Ttft,
            provider_ids: vec![1],
            cost_prompt_tokens: 0.0,
            cost_completion_tokens: 0.0,
            limits: Default::default(),
        }
    }
}
