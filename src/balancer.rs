//! Load Balancer (C5): pick one candidate provider for a router.
//!
//! `shuffle` is a uniform random choice; `least_busy` prefers a provider
//! with no recorded sample, then the lowest windowed average of the
//! router's configured metric, breaking ties by the lowest provider id for
//! determinism. Mirrors the two-strategy design of the original load
//! balancer (`ShuffleLoadBalancingStrategy` / `LeastBusyLoadBalancingStrategy`),
//! including its `(provider_id, performance_indicator)` return shape.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::metrics::MetricStore;
use crate::qos::QosMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    Shuffle,
    LeastBusy,
}

/// Averaging window `least_busy` reads from the metric store.
pub const LEAST_BUSY_WINDOW: Duration = Duration::from_secs(300);

/// Pick one provider id out of `candidates` (non-empty; panics otherwise —
/// callers must filter the registry down to routable providers first).
///
/// Returns the chosen provider id alongside its performance indicator for
/// `metric` — `None` for `shuffle` (no metric is consulted), or for
/// `least_busy` when the winning candidate has no recorded sample yet.
pub async fn select(
    candidates: &[u64],
    strategy: LoadBalancingStrategy,
    metric: QosMetric,
    store: &Arc<dyn MetricStore>,
) -> (u64, Option<f64>) {
    assert!(!candidates.is_empty(), "select requires at least one candidate");
    match strategy {
        LoadBalancingStrategy::Shuffle => (
            *candidates.choose(&mut rand::thread_rng()).expect("non-empty candidates"),
            None,
        ),
        LoadBalancingStrategy::LeastBusy => least_busy(candidates, metric, store).await,
    }
}

async fn least_busy(candidates: &[u64], metric: QosMetric, store: &Arc<dyn MetricStore>) -> (u64, Option<f64>) {
    let mut best: Option<(u64, Option<f64>)> = None;
    for &id in candidates {
        let avg = match metric {
            QosMetric::Inflight => store.gauge_get(metric.key(), id).await.map(|v| v as f64),
            _ => store.ts_window_avg(metric.key(), id, LEAST_BUSY_WINDOW).await,
        };
        best = Some(match best {
            None => (id, avg),
            Some((best_id, best_avg)) => match (best_avg, avg) {
                (Some(_), None) => (id, avg),
                (None, Some(_)) => (best_id, best_avg),
                (None, None) => {
                    if id < best_id {
                        (id, avg)
                    } else {
                        (best_id, best_avg)
                    }
                }
                (Some(b), Some(a)) => {
                    if a < b || (a == b && id < best_id) {
                        (id, avg)
                    } else {
                        (best_id, best_avg)
                    }
                }
            },
        });
    }
    best.expect("non-empty candidates")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{names, InMemoryMetricStore};

    fn store() -> Arc<dyn MetricStore> {
        Arc::new(InMemoryMetricStore::default())
    }

    #[tokio::test]
    async fn shuffle_always_returns_a_candidate_with_no_indicator() {
        let store = store();
        let candidates = vec![1, 2, 3];
        for _ in 0..20 {
            let (picked, indicator) = select(&candidates, LoadBalancingStrategy::Shuffle, QosMetric::Ttft, &store).await;
            assert!(candidates.contains(&picked));
            assert_eq!(indicator, None);
        }
    }

    #[tokio::test]
    async fn least_busy_prefers_no_sample_candidate() {
        let store = store();
        store.ts_add(names::TTFT, 1, 999.0).await;
        let candidates = vec![1, 2];
        let (picked, indicator) = least_busy(&candidates, QosMetric::Ttft, &store).await;
        assert_eq!(picked, 2);
        assert_eq!(indicator, None);
    }

    #[tokio::test]
    async fn least_busy_prefers_lower_average() {
        let store = store();
        store.ts_add(names::TTFT, 1, 100.0).await;
        store.ts_add(names::TTFT, 2, 500.0).await;
        let candidates = vec![1, 2];
        let (picked, indicator) = least_busy(&candidates, QosMetric::Ttft, &store).await;
        assert_eq!(picked, 1);
        assert_eq!(indicator, Some(100.0));
    }

    #[tokio::test]
    async fn least_busy_reads_the_configured_metric() {
        let store = store();
        // Lower latency for 1, lower performance for 2 — selection must follow
        // the metric passed in, not always fall back to latency.
        store.ts_add(names::LATENCY, 1, 50.0).await;
        store.ts_add(names::LATENCY, 2, 900.0).await;
        store.ts_add(names::PERFORMANCE, 1, 900.0).await;
        store.ts_add(names::PERFORMANCE, 2, 50.0).await;
        let candidates = vec![1, 2];

        let (picked, _) = least_busy(&candidates, QosMetric::Latency, &store).await;
        assert_eq!(picked, 1);
        let (picked, _) = least_busy(&candidates, QosMetric::Performance, &store).await;
        assert_eq!(picked, 2);
    }

    #[tokio::test]
    async fn least_busy_ties_break_on_lowest_id() {
        let store = store();
        let candidates = vec![3, 1, 2];
        let (picked, _) = least_busy(&candidates, QosMetric::Ttft, &store).await;
        assert_eq!(picked, 1);
    }
}
