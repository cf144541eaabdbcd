//! Concurrency & Metrics Substrate (C1).
//!
//! The original gateway keeps gauges and time series in Redis so every
//! worker process shares one view of inflight counts and recent latency.
//! This crate is a single process, so an in-memory [`DashMap`]-backed store
//! gives the same contract without the extra service. The [`MetricStore`]
//! trait stays `async` and returns `Option`/`Result` exactly as a networked
//! store would, so a Redis-backed implementation is a drop-in replacement
//! if this ever needs to run as more than one process.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Gauge key: `(metric name, provider id)`.
pub type GaugeKey = (&'static str, u64);

/// A single windowed time-series sample.
#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    value: f64,
}

/// A bounded, retention-trimmed time series for one `(metric, provider)`
/// pair. Duplicate timestamps overwrite rather than accumulate — the
/// "last value wins" duplicate policy the original store configures when it
/// creates a Redis TS key.
#[derive(Debug, Default)]
struct TimeSeries {
    samples: VecDeque<Sample>,
}

impl TimeSeries {
    fn add(&mut self, value: f64, retention: Duration) {
        let now = Instant::now();
        if let Some(last) = self.samples.back_mut() {
            if now.duration_since(last.at) < Duration::from_millis(1) {
                last.value = value;
                return;
            }
        }
        self.samples.push_back(Sample { at: now, value });
        self.trim(retention);
    }

    fn trim(&mut self, retention: Duration) {
        let cutoff = Instant::now().checked_sub(retention);
        if let Some(cutoff) = cutoff {
            while let Some(front) = self.samples.front() {
                if front.at < cutoff {
                    self.samples.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    fn window_avg(&self, window: Duration) -> Option<f64> {
        let cutoff = Instant::now().checked_sub(window)?;
        let mut sum = 0.0;
        let mut count = 0u64;
        for s in self.samples.iter().rev() {
            if s.at < cutoff {
                break;
            }
            sum += s.value;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f64)
        }
    }
}

/// Trait over the metric store protocol (gauges + windowed time series).
///
/// `None` from a read method means "no information available" and callers
/// (C5, C6) must treat it as the permissive case — preferred candidate, or
/// admit — which is what lets the whole substrate degrade open on failure.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    async fn incr(&self, metric: &'static str, provider_id: u64);
    async fn decr(&self, metric: &'static str, provider_id: u64);
    async fn gauge_get(&self, metric: &'static str, provider_id: u64) -> Option<i64>;
    async fn ts_add(&self, metric: &'static str, provider_id: u64, value: f64);
    async fn ts_window_avg(
        &self,
        metric: &'static str,
        provider_id: u64,
        window: Duration,
    ) -> Option<f64>;
}

/// In-memory implementation backed by `DashMap`s of atomics / mutexed
/// deques. Construction takes the retention window used for all time series
/// (the original store sets `retention_msecs` once per key at creation).
pub struct InMemoryMetricStore {
    gauges: DashMap<GaugeKey, AtomicI64>,
    series: DashMap<GaugeKey, std::sync::Mutex<TimeSeries>>,
    retention: Duration,
}

impl InMemoryMetricStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            gauges: DashMap::new(),
            series: DashMap::new(),
            retention,
        }
    }
}

impl Default for InMemoryMetricStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryMetricStore {
    async fn incr(&self, metric: &'static str, provider_id: u64) {
        self.gauges
            .entry((metric, provider_id))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::AcqRel);
    }

    async fn decr(&self, metric: &'static str, provider_id: u64) {
        self.gauges
            .entry((metric, provider_id))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_sub(1, Ordering::AcqRel);
    }

    async fn gauge_get(&self, metric: &'static str, provider_id: u64) -> Option<i64> {
        self.gauges
            .get(&(metric, provider_id))
            .map(|v| v.load(Ordering::Acquire))
    }

    async fn ts_add(&self, metric: &'static str, provider_id: u64, value: f64) {
        let entry = self
            .series
            .entry((metric, provider_id))
            .or_insert_with(|| std::sync::Mutex::new(TimeSeries::default()));
        entry.lock().unwrap().add(value, self.retention);
    }

    async fn ts_window_avg(
        &self,
        metric: &'static str,
        provider_id: u64,
        window: Duration,
    ) -> Option<f64> {
        self.series
            .get(&(metric, provider_id))
            .and_then(|e| e.lock().unwrap().window_avg(window))
    }
}

/// Metric names used as the first element of every [`GaugeKey`]. Centralized
/// here so call sites never hand-roll the string.
pub mod names {
    pub const INFLIGHT: &str = "inflight";
    pub const TTFT: &str = "ttft";
    pub const LATENCY: &str = "latency";
    pub const PERFORMANCE: &str = "performance";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_incr_decr_roundtrip() {
        let store = InMemoryMetricStore::default();
        store.incr(names::INFLIGHT, 1).await;
        store.incr(names::INFLIGHT, 1).await;
        store.decr(names::INFLIGHT, 1).await;
        assert_eq!(store.gauge_get(names::INFLIGHT, 1).await, Some(1));
    }

    #[tokio::test]
    async fn unknown_gauge_reads_as_none() {
        let store = InMemoryMetricStore::default();
        assert_eq!(store.gauge_get(names::INFLIGHT, 99).await, None);
    }

    #[tokio::test]
    async fn window_avg_averages_recent_samples() {
        let store = InMemoryMetricStore::default();
        store.ts_add(names::LATENCY, 1, 100.0).await;
        store.ts_add(names::LATENCY, 1, 200.0).await;
        let avg = store
            .ts_window_avg(names::LATENCY, 1, Duration::from_secs(60))
            .await;
        assert!(avg.is_some());
    }

    #[tokio::test]
    async fn window_avg_none_without_samples() {
        let store = InMemoryMetricStore::default();
        let avg = store
            .ts_window_avg(names::LATENCY, 42, Duration::from_secs(60))
            .await;
        assert_eq!(avg, None);
    }
}
