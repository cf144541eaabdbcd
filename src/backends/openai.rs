//! OpenAI-compatible chat completions adapter.
//!
//! Handles any backend that speaks the OpenAI `/v1/chat/completions`
//! protocol verbatim — vLLM, OpenAI itself, and Albert all qualify. No
//! schema translation is performed; the request body is forwarded as-is.

use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt as _;
use reqwest::{header, Client};
use serde_json::Value;

use super::SseStream;

/// Adapter for any OpenAI-compatible backend.
///
/// Constructed once per provider; [`Client`] is cheaply clonable internally
/// (it wraps an `Arc`) so there is no meaningful overhead to building it
/// per dispatch either.
pub struct OpenAIAdapter {
    /// Buffered requests — has the configured request timeout.
    client: Client,
    /// Streaming requests — no request-level timeout (body arrives incrementally).
    stream_client: Client,
    base_url: String,
}

impl OpenAIAdapter {
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
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading response body")?;

        if !status.is_success() {
            anyhow::bail!("backend returned HTTP {status}: {text}");
        }

        serde_json::from_str(&text)
            .with_context(|| format!("parsing backend response as JSON: {text}"))
    }

    pub async fn embeddings(&self, body: Value) -> anyhow::Result<Value> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading response body")?;
        if !status.is_success() {
            anyhow::bail!("backend returned HTTP {status}: {text}");
        }
        serde_json::from_str(&text).with_context(|| format!("parsing backend response as JSON: {text}"))
    }

    pub async fn chat_completions_stream(&self, body: Value) -> anyhow::Result<SseStream> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ok_completion_body() -> Value {
        json!({
            "choices": [{ "message": { "content": "hello there" } }]
        })
    }

    #[tokio::test]
    async fn chat_completions_returns_parsed_json_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_completion_body()))
            .mount(&server)
            .await;

        let adapter = OpenAIAdapter::new(server.uri(), 5_000, None);
        let result = adapter
            .chat_completions(json!({"model": "test", "messages": []}))
            .await
            .unwrap();
        assert!(result.pointer("/choices/0/message/content").is_some());
    }

    #[tokio::test]
    async fn chat_completions_errors_on_non_2xx_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let adapter = OpenAIAdapter::new(server.uri(), 5_000, None);
        let err = adapter
            .chat_completions(json!({"model": "test", "messages": []}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn health_check_returns_ok_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list", "data": []})))
            .mount(&server)
            .await;

        let adapter = OpenAIAdapter::new(server.uri(), 5_000, None);
        assert!(adapter.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn health_check_errors_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = OpenAIAdapter::new(server.uri(), 5_000, None);
        let err = adapter.health_check().await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
