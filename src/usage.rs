//! Usage Recorder (C9): ties the tokenizer and carbon calculator together
//! and folds the result into the active request's [`crate::context::Usage`].
//!
//! Grounded on `_get_usage` in the provider base class this crate's
//! provider adapters are modeled on: compute prompt/completion tokens,
//! compute cost from the router's per-token prices, compute carbon impact
//! when the provider carries parameter counts, and accumulate — logging and
//! swallowing any failure rather than failing the request, since usage
//! accounting must never block a response reaching the caller.

use crate::carbon::carbon_footprint;
use crate::context::Usage;
use crate::registry::Provider;
use crate::tokenizer::Tokenizer;

/// Per-router pricing, in cost units per 1,000,000 tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pricing {
    pub cost_prompt_tokens: f64,
    pub cost_completion_tokens: f64,
}

fn round6(v: f64) -> f64 {
    (v * 1_000_000.0).round() / 1_000_000.0
}

/// Compute cost for `prompt_tokens`/`completion_tokens` at `pricing`,
/// rounded to 6 decimal places.
pub fn compute_cost(pricing: Pricing, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let cost = (prompt_tokens as f64 / 1_000_000.0) * pricing.cost_prompt_tokens
        + (completion_tokens as f64 / 1_000_000.0) * pricing.cost_completion_tokens;
    round6(cost)
}

/// Fold token counts, cost, and (when the provider publishes parameter
/// counts and an electricity zone) carbon impact into `usage`. Never
/// returns an error to the caller — failures are logged and the usage
/// block is left as-is for whatever was already accumulated.
pub fn record(
    usage: &mut Usage,
    provider: &Provider,
    pricing: Pricing,
    prompt_tokens: u64,
    completion_tokens: u64,
    latency_ms: u64,
) {
    usage.add_tokens(prompt_tokens, completion_tokens);
    usage.cost = round6(usage.cost + compute_cost(pricing, prompt_tokens, completion_tokens));

    let (Some(active_params), Some(total_params), Some(zone)) = (
        provider.active_params_b,
        provider.total_params_b,
        provider.electricity_zone.as_deref(),
    ) else {
        return;
    };

    match carbon_footprint(
        active_params,
        total_params,
        zone,
        prompt_tokens + completion_tokens,
        latency_ms,
    ) {
        Ok(fp) => {
            usage.kwh_min = Some(usage.kwh_min.unwrap_or(0.0) + fp.kwh.min);
            usage.kwh_max = Some(usage.kwh_max.unwrap_or(0.0) + fp.kwh.max);
            usage.kgco2eq_min = Some(usage.kgco2eq_min.unwrap_or(0.0) + fp.kgco2eq.min);
            usage.kgco2eq_max = Some(usage.kgco2eq_max.unwrap_or(0.0) + fp.kgco2eq.max);
        }
        Err(e) => {
            tracing::warn!(provider_id = provider.id, error = %e, "carbon footprint computation failed");
        }
    }
}

/// Convenience wrapper for endpoints whose prompt tokens come from a chat
/// `messages` array (as opposed to an embeddings `input` field).
pub fn prompt_tokens_for_chat(tokenizer: &Tokenizer, body: &serde_json::Value) -> u64 {
    tokenizer.prompt_tokens_from_messages(body)
}
