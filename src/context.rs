//! Per-request context carried implicitly through the dispatch pipeline.
//!
//! Mirrors the role of `contextvars`-based request context in the gateway
//! this crate is modeled on, but uses [`tokio::task_local!`] instead of a
//! process-global — every request's context lives only for the lifetime of
//! the task that handles it, and concurrent requests never see each other's
//! state.

use std::collections::HashMap;

use serde::Serialize;

/// Caller identity resolved by the access controller (C8).
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub id: u64,
    pub key_id: u64,
    pub key_name: Option<String>,
    /// Empty means "no permission restriction" only for the master user.
    pub permissions: Vec<String>,
}

impl UserInfo {
    /// The synthetic identity used when the master key is presented.
    pub fn master() -> Self {
        Self {
            id: 0,
            key_id: 0,
            key_name: Some("master".to_string()),
            permissions: vec!["*".to_string()],
        }
    }

    pub fn is_master(&self) -> bool {
        self.id == 0
    }
}

/// Token usage accumulated over the lifetime of a single request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
    pub kwh_min: Option<f64>,
    pub kwh_max: Option<f64>,
    pub kgco2eq_min: Option<f64>,
    pub kgco2eq_max: Option<f64>,
}

impl Usage {
    pub fn add_tokens(&mut self, prompt: u64, completion: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens = self.prompt_tokens + self.completion_tokens;
    }
}

/// Everything the dispatch pipeline accumulates about one request.
///
/// Constructed once per request in `context_middleware` and threaded through
/// [`REQUEST_CONTEXT`]; components read and mutate it as the request
/// progresses, and the usage recorder (C9) reads the final snapshot once the
/// response has been fully produced.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: String,
    pub endpoint: String,
    pub user_info: Option<UserInfo>,
    pub router_id: Option<u64>,
    pub router_name: Option<String>,
    pub provider_id: Option<u64>,
    pub provider_name: Option<String>,
    pub usage: Usage,
    pub ttft_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub additional_data: HashMap<String, serde_json::Value>,
}

impl RequestContext {
    pub fn new(request_id: String, method: String, endpoint: String) -> Self {
        Self {
            request_id,
            method,
            endpoint,
            user_info: None,
            router_id: None,
            router_name: None,
            provider_id: None,
            provider_name: None,
            usage: Usage::default(),
            ttft_ms: None,
            latency_ms: None,
            additional_data: HashMap::new(),
        }
    }
}

tokio::task_local! {
    /// The active request's context. Scoped by `context_middleware` for the
    /// full lifetime of the handler future; components reach it via
    /// [`current`]/[`try_current`] rather than threading an extra parameter
    /// through every call.
    pub static REQUEST_CONTEXT: std::cell::RefCell<RequestContext>;
}

/// Run `f` with `ctx` bound as the current request context for the duration
/// of the future it returns.
pub async fn scope<F, T>(ctx: RequestContext, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    REQUEST_CONTEXT.scope(std::cell::RefCell::new(ctx), f).await
}

/// Access the current request context. Panics outside of [`scope`] — every
/// handler on the dispatch path runs inside `context_middleware`, so this is
/// a programming error, not a runtime condition, if it fires.
pub fn with_current<F, T>(f: F) -> T
where
    F: FnOnce(&mut RequestContext) -> T,
{
    REQUEST_CONTEXT.with(|cell| f(&mut cell.borrow_mut()))
}

/// Like [`with_current`] but returns `None` instead of panicking when no
/// context is bound (used by code paths, like `/healthz`, that may run
/// outside `context_middleware`).
pub fn try_with_current<F, T>(f: F) -> Option<T>
where
    F: FnOnce(&mut RequestContext) -> T,
{
    REQUEST_CONTEXT.try_with(|cell| f(&mut cell.borrow_mut())).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scope_isolates_concurrent_requests() {
        let a = scope(
            RequestContext::new("a".into(), "POST".into(), "/v1/chat/completions".into()),
            async {
                tokio::task::yield_now().await;
                with_current(|ctx| ctx.request_id.clone())
            },
        );
        let b = scope(
            RequestContext::new("b".into(), "POST".into(), "/v1/chat/completions".into()),
            async {
                with_current(|ctx| ctx.request_id.clone())
            },
        );
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a, "a");
        assert_eq!(b, "b");
    }

    #[test]
    fn master_user_bypasses_permissions() {
        let u = UserInfo::master();
        assert!(u.is_master());
        assert_eq!(u.id, 0);
    }

    #[test]
    fn usage_accumulates_total() {
        let mut usage = Usage::default();
        usage.add_tokens(10, 5);
        usage.add_tokens(3, 2);
        assert_eq!(usage.prompt_tokens, 13);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 20);
    }
}
