//! Provider Client (C3): unified dispatch interface over upstream dialects.
//!
//! [`ProviderClient`] is an enum wrapping a concrete adapter chosen at
//! construction time from [`Provider::kind`]. Every caller interacts with
//! the same small method set (`chat_completions`, `chat_completions_stream`,
//! `rerank`, `health_check`); dialect differences — schema translation,
//! auth headers, endpoint paths — are fully encapsulated in the adapter
//! modules, the same enum-dispatch shape the teacher's `BackendClient` uses.

mod mistral;
mod openai;
mod tei;

pub use mistral::MistralAdapter;
pub use openai::OpenAIAdapter;
pub use tei::TeiAdapter;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::Stream;
use serde_json::Value;

use crate::metrics::{names, MetricStore};
use crate::registry::{Provider, ProviderKind};

/// A `Send`-able, heap-allocated SSE byte stream. Each item is a chunk of
/// raw SSE data already in OpenAI wire format, or an error.
pub type SseStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>> + Send>>;

/// RAII guard incrementing a provider's inflight gauge on construction and
/// decrementing it on `Drop` — this is what gives the inflight counter its
/// "increment strictly precedes the call, decrement strictly follows its
/// termination" guarantee even across early returns, `?`, and cancellation,
/// where the original source relies on a `try/finally`.
pub struct InflightGuard {
    store: Arc<dyn MetricStore>,
    provider_id: u64,
}

impl InflightGuard {
    pub async fn acquire(store: Arc<dyn MetricStore>, provider_id: u64) -> Self {
        store.incr(names::INFLIGHT, provider_id).await;
        Self { store, provider_id }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let store = self.store.clone();
        let provider_id = self.provider_id;
        tokio::spawn(async move {
            store.decr(names::INFLIGHT, provider_id).await;
        });
    }
}

/// Unified provider client — enum dispatch over concrete dialect adapters.
pub enum ProviderClient {
    /// OpenAI-compatible passthrough — used for `vllm`, `openai`, and
    /// `albert` providers, which all speak the same wire protocol.
    OpenAi(OpenAIAdapter),
    Mistral(MistralAdapter),
    Tei(TeiAdapter),
}

impl ProviderClient {
    /// Build a client from a registry [`Provider`], resolving its API key
    /// from the environment.
    pub fn new(provider: &Provider) -> anyhow::Result<Self> {
        let base_url = provider.base_url.trim_end_matches('/').to_string();
        let api_key = provider.api_key();
        Ok(match provider.kind {
            ProviderKind::OpenAi | ProviderKind::Vllm | ProviderKind::Albert => {
                Self::OpenAi(OpenAIAdapter::new(base_url, 30_000, api_key))
            }
            ProviderKind::Mistral => Self::Mistral(MistralAdapter::new(base_url, 30_000, api_key)),
            ProviderKind::Tei => Self::Tei(TeiAdapter::new(base_url, 30_000, api_key)),
        })
    }

    pub async fn chat_completions(&self, request: Value) -> anyhow::Result<Value> {
        match self {
            Self::OpenAi(a) => a.chat_completions(request).await,
            Self::Mistral(a) => a.chat_completions(request).await,
            Self::Tei(_) => anyhow::bail!("this provider does not support chat completions"),
        }
    }

    pub async fn chat_completions_stream(&self, request: Value) -> anyhow::Result<SseStream> {
        match self {
            Self::OpenAi(a) => a.chat_completions_stream(request).await,
            Self::Mistral(a) => a.chat_completions_stream(request).await,
            Self::Tei(_) => anyhow::bail!("this provider does not support streaming"),
        }
    }

    pub async fn rerank(&self, query: String, documents: Vec<String>) -> anyhow::Result<Value> {
        match self {
            Self::Tei(a) => a.rerank(query, documents).await,
            _ => anyhow::bail!("this provider does not support reranking"),
        }
    }

    pub async fn embeddings(&self, request: Value) -> anyhow::Result<Value> {
        match self {
            Self::OpenAi(a) => a.embeddings(request).await,
            Self::Tei(a) => a.embeddings(request).await,
            Self::Mistral(_) => anyhow::bail!("this provider does not support embeddings"),
        }
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        match self {
            Self::OpenAi(a) => a.health_check().await,
            Self::Mistral(a) => a.health_check().await,
            Self::Tei(a) => a.health_check().await,
        }
    }
}

/// Timing captured while forwarding one buffered (non-streaming) request,
/// fed into the `latency`/`performance` windowed metrics after the call
/// completes.
pub struct CallTiming {
    pub latency_ms: u64,
}

/// Run a buffered chat-completions call with the inflight guard and
/// latency metric recording the dispatch pipeline requires around every
/// provider call.
pub async fn timed_chat_completions(
    client: &ProviderClient,
    store: &Arc<dyn MetricStore>,
    provider_id: u64,
    request: Value,
) -> (anyhow::Result<Value>, CallTiming) {
    let _guard = InflightGuard::acquire(store.clone(), provider_id).await;
    let start = Instant::now();
    let result = client.chat_completions(request).await;
    let latency_ms = start.elapsed().as_millis() as u64;
    store.ts_add(names::LATENCY, provider_id, latency_ms as f64).await;
    (result, CallTiming { latency_ms })
}
