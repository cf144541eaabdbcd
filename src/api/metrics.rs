//! Prometheus-compatible `/metrics` endpoint.
//!
//! All metrics are derived from the in-memory traffic ring-buffer (C1's
//! windowed time series live in `src/metrics.rs` and back dispatch
//! decisions directly; this endpoint renders a separate, human/operator-
//! facing view over the same kind of window). Because the buffer has a
//! fixed capacity, values represent a **sliding window** of recent requests
//! rather than lifetime counters. `TYPE gauge` is used throughout for
//! semantic accuracy — values may decrease as old entries rotate out.
//!
//! Metric families:
//! - `lmg_window_size`        — entries currently in the ring buffer
//! - `lmg_requests`           — per-router/provider/outcome request counts
//! - `lmg_latency_ms_sum`     — sum of latencies per router/provider (for avg)
//! - `lmg_latency_ms_count`   — denominator matching the sum above
//! - `lmg_prompt_tokens_total`     — prompt tokens billed, per router
//! - `lmg_completion_tokens_total` — completion tokens billed, per router
//! - `lmg_cost_total`              — accumulated cost, per router
//! - `lmg_errors_total`       — requests that returned an error

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::state::GatewayState;

/// `GET /metrics` — renders Prometheus text format.
pub async fn metrics(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    // Grab the full ring-buffer window in one lock acquisition.
    let entries = state.traffic.recent(usize::MAX).await;

    let window_size = entries.len();
    let mut errors: u64 = 0;

    // (router, provider, success) → count
    let mut request_counts: HashMap<(String, String, bool), u64> = HashMap::new();
    // (router, provider) → (latency_sum_ms, count)
    let mut latency: HashMap<(String, String), (u64, u64)> = HashMap::new();
    // router → (prompt_tokens, completion_tokens, cost)
    let mut usage: HashMap<String, (u64, u64, f64)> = HashMap::new();

    for e in &entries {
        if !e.success {
            errors += 1;
        }

        *request_counts.entry((e.router.clone(), e.provider.clone(), e.success)).or_default() += 1;

        let lat = latency.entry((e.router.clone(), e.provider.clone())).or_default();
        lat.0 += e.latency_ms;
        lat.1 += 1;

        let u = usage.entry(e.router.clone()).or_default();
        u.0 += e.usage.prompt_tokens;
        u.1 += e.usage.completion_tokens;
        u.2 += e.usage.cost;
    }

    let mut out = String::with_capacity(1024);

    out.push_str("# HELP lmg_window_size Number of requests currently held in the ring-buffer window.\n");
    out.push_str("# TYPE lmg_window_size gauge\n");
    out.push_str(&format!("lmg_window_size {window_size}\n\n"));

    out.push_str("# HELP lmg_requests Request count in the current window, labelled by router, provider, and outcome.\n");
    out.push_str("# TYPE lmg_requests gauge\n");
    let mut req_rows: Vec<_> = request_counts.iter().collect();
    req_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((router, provider, success), count) in req_rows {
        let success_str = if *success { "true" } else { "false" };
        out.push_str(&format!(
            "lmg_requests{{router=\"{router}\",provider=\"{provider}\",success=\"{success_str}\"}} {count}\n"
        ));
    }
    out.push('\n');

    out.push_str("# HELP lmg_latency_ms_sum Sum of request latency (ms) in the current window, grouped by router and provider.\n");
    out.push_str("# TYPE lmg_latency_ms_sum gauge\n");
    out.push_str("# HELP lmg_latency_ms_count Number of observations for the latency sum above.\n");
    out.push_str("# TYPE lmg_latency_ms_count gauge\n");
    let mut lat_rows: Vec<_> = latency.iter().collect();
    lat_rows.sort_by(|a, b| a.0.cmp(b.0));
    for ((router, provider), (sum, count)) in lat_rows {
        out.push_str(&format!("lmg_latency_ms_sum{{router=\"{router}\",provider=\"{provider}\"}} {sum}\n"));
        out.push_str(&format!("lmg_latency_ms_count{{router=\"{router}\",provider=\"{provider}\"}} {count}\n"));
    }
    out.push('\n');

    out.push_str("# HELP lmg_prompt_tokens_total Prompt tokens billed in the current window, grouped by router.\n");
    out.push_str("# TYPE lmg_prompt_tokens_total gauge\n");
    out.push_str("# HELP lmg_completion_tokens_total Completion tokens billed in the current window, grouped by router.\n");
    out.push_str("# TYPE lmg_completion_tokens_total gauge\n");
    out.push_str("# HELP lmg_cost_total Accumulated cost in the current window, grouped by router.\n");
    out.push_str("# TYPE lmg_cost_total gauge\n");
    let mut usage_rows: Vec<_> = usage.iter().collect();
    usage_rows.sort_by(|a, b| a.0.cmp(b.0));
    for (router, (prompt, completion, cost)) in usage_rows {
        out.push_str(&format!("lmg_prompt_tokens_total{{router=\"{router}\"}} {prompt}\n"));
        out.push_str(&format!("lmg_completion_tokens_total{{router=\"{router}\"}} {completion}\n"));
        out.push_str(&format!("lmg_cost_total{{router=\"{router}\"}} {cost}\n"));
    }
    out.push('\n');

    out.push_str("# HELP lmg_errors_total Requests that returned an error in the current window.\n");
    out.push_str("# TYPE lmg_errors_total gauge\n");
    out.push_str(&format!("lmg_errors_total {errors}\n"));

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::context::Usage;
    use crate::traffic::{TrafficEntry, TrafficLog};

    fn mock_log() -> Arc<TrafficLog> {
        let log = Arc::new(TrafficLog::new(100));
        log.push(
            TrafficEntry::new("r1".into(), "/v1/chat/completions".into(), "fast".into(), "openai-prod".into(), 120, true)
                .with_requested_model("gpt-4o")
                .with_usage(Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15, cost: 0.01, ..Default::default() }),
        );
        log.push(
            TrafficEntry::new("r2".into(), "/v1/chat/completions".into(), "fast".into(), "openai-prod".into(), 95, true)
                .with_requested_model("gpt-4o"),
        );
        log.push(TrafficEntry::new("r3".into(), "/v1/chat/completions".into(), "economy".into(), "vllm-local".into(), 430, true));
        log.push(
            TrafficEntry::new("r4".into(), "/v1/chat/completions".into(), "fast".into(), "openai-prod".into(), 80, false)
                .with_error("upstream 500"),
        );
        log
    }

    #[tokio::test]
    async fn window_size_equals_entry_count() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        assert_eq!(entries.len(), 4);
    }

    #[tokio::test]
    async fn error_count_is_accurate() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let errors = entries.iter().filter(|e| !e.success).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn latency_sum_is_accurate() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let sum: u64 = entries
            .iter()
            .filter(|e| e.router == "fast" && e.provider == "openai-prod")
            .map(|e| e.latency_ms)
            .sum();
        // 120 + 95 + 80 = 295
        assert_eq!(sum, 295);
    }

    #[tokio::test]
    async fn usage_totals_accumulate_per_router() {
        let log = mock_log();
        let entries = log.recent(usize::MAX).await;
        let prompt_tokens: u64 = entries.iter().filter(|e| e.router == "fast").map(|e| e.usage.prompt_tokens).sum();
        assert_eq!(prompt_tokens, 10);
    }
}
