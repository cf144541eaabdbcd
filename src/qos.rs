//! QoS Gate (C6): admit-or-reject a candidate provider against a single
//! metric limit.
//!
//! A direct port of `apply_sync_qos_policy`/`apply_async_qos_policy`:
//! absent metric or absent limit always admits. `inflight` reads the gauge
//! directly (current count); every other metric reads a windowed average.
//! Both comparisons use `<=` — "lower is better", so the caller is rejected
//! only once it would push a provider strictly over its configured limit.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::{names, MetricStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QosMetric {
    Inflight,
    #[default]
    Ttft,
    Latency,
    /// Milliseconds per completion token. Not specified upstream; this
    /// crate's own formula (see DESIGN.md's Open Question resolution).
    Performance,
}

impl QosMetric {
    pub(crate) fn key(self) -> &'static str {
        match self {
            QosMetric::Inflight => names::INFLIGHT,
            QosMetric::Ttft => names::TTFT,
            QosMetric::Latency => names::LATENCY,
            QosMetric::Performance => names::PERFORMANCE,
        }
    }
}

/// Default averaging window for non-inflight metrics.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(300);

/// `true` means the candidate may be dispatched to.
pub async fn admit(
    store: &Arc<dyn MetricStore>,
    provider_id: u64,
    qos_metric: Option<QosMetric>,
    qos_limit: Option<f64>,
) -> bool {
    let (Some(metric), Some(limit)) = (qos_metric, qos_limit) else {
        return true;
    };

    match metric {
        QosMetric::Inflight => match store.gauge_get(metric.key(), provider_id).await {
            Some(inflight) => (inflight as f64) <= limit,
            None => true,
        },
        _ => match store
            .ts_window_avg(metric.key(), provider_id, DEFAULT_WINDOW)
            .await
        {
            Some(avg) => avg <= limit,
            None => true,
        },
    }
}
