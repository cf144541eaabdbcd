//! Mistral chat-completions adapter.
//!
//! Mistral's API is OpenAI-shaped but rejects or ignores a handful of
//! fields the OpenAI schema allows. This adapter normalizes a request
//! before forwarding it — dropping unsupported keys and forcing safe
//! defaults — following the same translate-then-forward structure as the
//! teacher's Anthropic adapter, just a lighter transform since both sides
//! are already chat-completion shaped.
//!
//! # Normalization applied
//!
//! | Field | Rule |
//! |---|---|
//! | `frequency_penalty` | forced to `0` |
//! | `presence_penalty` | forced to `0` |
//! | `top_p` | forced to `1` |
//! | `parallel_tool_calls` | forced to `false` |
//! | `response_format` | forced to `{"type": "text"}` |
//! | `stream` | defaults to `false` when absent |
//! | `stop` | dropped if `null` |
//! | `seed` | renamed to `random_seed` |

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt as _;
use reqwest::{header, Client};
use serde_json::{json, Value};

use super::SseStream;

pub(crate) fn normalize_request(mut body: Value) -> Value {
    let Some(obj) = body.as_object_mut() else {
        return body;
    };

    obj.insert("frequency_penalty".into(), json!(0));
    obj.insert("presence_penalty".into(), json!(0));
    obj.insert("top_p".into(), json!(1));
    obj.insert("parallel_tool_calls".into(), json!(false));
    obj.insert("response_format".into(), json!({"type": "text"}));
    obj.entry("stream").or_insert(json!(false));

    if matches!(obj.get("stop"), Some(Value::Null)) {
        obj.remove("stop");
    }

    if let Some(seed) = obj.remove("seed") {
        obj.insert("random_seed".into(), seed);
    }

    body
}

pub struct MistralAdapter {
    client: Client,
    stream_client: Client,
    base_url: String,
}

impl MistralAdapter {
    pub fn new(base_url: String, timeout_ms: u64, api_key: Option<String>) -> Self {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = format!("Bearer {key}");
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&value)
                    .expect("API key contains invalid Authorization header characters"),
            );
        }

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");
        let stream_client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build streaming reqwest client");

        Self {
            client,
            stream_client,
            base_url,
        }
    }

    pub async fn chat_completions(&self, body: Value) -> anyhow::Result<Value> {
        let body = normalize_request(body);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading Mistral response body")?;
        if !status.is_success() {
            anyhow::bail!("Mistral returned HTTP {status}: {text}");
        }
        serde_json::from_str(&text).with_context(|| format!("parsing Mistral response as JSON: {text}"))
    }

    pub async fn chat_completions_stream(&self, body: Value) -> anyhow::Result<SseStream> {
        let body = normalize_request(body);
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .stream_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} (streaming)"))?;
        let stream = response.bytes_stream().map(|r| r.map_err(anyhow::Error::from));
        Ok(Box::pin(stream))
    }

    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!("{}/v1/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        anyhow::ensure!(
            response.status().is_success(),
            "health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}
