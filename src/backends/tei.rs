//! Text Embeddings Inference (TEI) rerank adapter.
//!
//! A thin wrapper around TEI's `/rerank` endpoint, following the same
//! keyless, single-endpoint wrapper shape as the teacher's local-inference
//! adapter. Translates the unified `{query, documents}` request into TEI's
//! wire format and its response back into the unified `Reranks` shape.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, Client};
use serde_json::{json, Value};

pub struct TeiAdapter {
    client: Client,
    base_url: String,
}

impl TeiAdapter {
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
            .default_headers(headers)
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .expect("failed to build reqwest client");

        Self { client, base_url }
    }

    /// `POST /rerank`, translating the unified request/response shape to
    /// and from TEI's wire format.
    pub async fn rerank(&self, query: String, documents: Vec<String>) -> anyhow::Result<Value> {
        let tei_req = json!({
            "query": query,
            "texts": documents,
            "raw_scores": false,
            "return_text": false,
            "truncate": false,
            "truncation_direction": "right",
        });

        let url = format!("{}/rerank", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&tei_req)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading TEI response body")?;
        if !status.is_success() {
            anyhow::bail!("TEI returned HTTP {status}: {text}");
        }

        let tei_resp: Value =
            serde_json::from_str(&text).with_context(|| format!("parsing TEI response as JSON: {text}"))?;
        Ok(from_tei(tei_resp, &documents))
    }

    /// `POST /embeddings`, forwarded as-is — TEI's embeddings wire shape
    /// already matches the unified `{input: [...]}` request/response shape.
    pub async fn embeddings(&self, body: Value) -> anyhow::Result<Value> {
        let url = format!("{}/embeddings", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        let text = response.text().await.context("reading TEI response body")?;
        if !status.is_success() {
            anyhow::bail!("TEI returned HTTP {status}: {text}");
        }
        serde_json::from_str(&text).with_context(|| format!("parsing TEI response as JSON: {text}"))
    }

    /// TEI has no `/v1/models` endpoint; probe with a trivial rerank call.
    pub async fn health_check(&self) -> anyhow::Result<()> {
        let url = format!("{}/rerank", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({"query": "ping", "texts": ["pong"]}))
            .send()
            .await
            .with_context(|| format!("POST {url} (health check)"))?;
        anyhow::ensure!(
            response.status().is_success(),
            "health check returned HTTP {}",
            response.status()
        );
        Ok(())
    }
}

/// TEI returns `[{"index": 0, "score": 0.9}, ...]`; build the unified
/// `{"results": [{"index", "relevance_score"}]}` envelope from it.
fn from_tei(tei_resp: Value, documents: &[String]) -> Value {
    let results: Vec<Value> = tei_resp
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let index = item.get("index")?.as_u64()?;
                    let score = item.get("score")?.as_f64()?;
                    Some(json!({"index": index, "relevance_score": score}))
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "results": results,
        "num_documents": documents.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn from_tei_builds_unified_shape() {
        let tei_resp = json!([{"index": 1, "score": 0.8}, {"index": 0, "score": 0.3}]);
        let docs = vec!["a".to_string(), "b".to_string()];
        let unified = from_tei(tei_resp, &docs);
        assert_eq!(unified["num_documents"], json!(2));
        assert_eq!(unified["results"][0]["relevance_score"], json!(0.8));
    }

    #[tokio::test]
    async fn rerank_translates_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"index": 0, "score": 0.95}
            ])))
            .mount(&server)
            .await;

        let adapter = TeiAdapter::new(server.uri(), 5_000, None);
        let result = adapter
            .rerank("query".to_string(), vec!["doc".to_string()])
            .await
            .unwrap();
        assert_eq!(result["results"][0]["index"], json!(0));
    }

    #[tokio::test]
    async fn rerank_errors_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rerank"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = TeiAdapter::new(server.uri(), 5_000, None);
        let err = adapter
            .rerank("q".to_string(), vec!["d".to_string()])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
