//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest
//! entry is evicted to make room for the newest. This gives a bounded,
//! O(1) memory footprint regardless of request volume — the same shape as
//! the teacher's log, generalized from tier/backend fields to
//! router/provider plus the usage block C9 computes.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::context::Usage;

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push]
/// uses a non-blocking `try_lock` so it never delays request handling; in
/// the unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.success).count();

        let mut router_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for entry in entries.iter() {
            *router_counts.entry(entry.router.clone()).or_default() += 1;
        }

        TrafficStats {
            total_requests: total,
            error_count,
            avg_latency_ms,
            router_counts,
        }
    }
}

/// A single request record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub requested_model: Option<String>,
    pub router: String,
    pub provider: String,
    pub user_id: Option<u64>,
    pub latency_ms: u64,
    pub ttft_ms: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
    pub usage: Usage,
}

impl TrafficEntry {
    pub fn new(
        request_id: String,
        endpoint: String,
        router: String,
        provider: String,
        latency_ms: u64,
        success: bool,
    ) -> Self {
        Self {
            id: request_id,
            timestamp: Utc::now(),
            endpoint,
            requested_model: None,
            router,
            provider,
            user_id: None,
            latency_ms,
            ttft_ms: None,
            success,
            error: None,
            usage: Usage::default(),
        }
    }

    pub fn with_requested_model(mut self, model: &str) -> Self {
        self.requested_model = Some(model.to_string());
        self
    }

    pub fn with_user_id(mut self, id: u64) -> Self {
        self.user_id = Some(id);
        self
    }

    pub fn with_ttft_ms(mut self, ttft_ms: u64) -> Self {
        self.ttft_ms = Some(ttft_ms);
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.error = Some(err.to_string());
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub avg_latency_ms: f64,
    pub router_counts: std::collections::HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn make_entry(router: &str, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new(
            Uuid::new_v4().to_string(),
            "/v1/chat/completions".into(),
            router.into(),
            "test-provider".into(),
            latency_ms,
            true,
        )
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("fast", 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].router, "fast");
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("a", 1));
        log.push(make_entry("b", 2));
        log.push(make_entry("c", 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].router, "c");
        assert_eq!(recent[1].router, "b");
        assert_eq!(recent[2].router, "a");
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("oldest", 1));
        log.push(make_entry("middle", 2));
        log.push(make_entry("newest", 3));
        log.push(make_entry("extra", 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.router == "oldest"));
        assert!(all.iter().any(|e| e.router == "extra"));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
    }

    #[tokio::test]
    async fn stats_averages_latency_correctly() {
        let log = TrafficLog::new(10);
        log.push(make_entry("fast", 100));
        log.push(make_entry("fast", 200));
        log.push(make_entry("economy", 300));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stats_counts_requests_per_router() {
        let log = TrafficLog::new(10);
        log.push(make_entry("fast", 10));
        log.push(make_entry("fast", 20));
        log.push(make_entry("economy", 30));

        let stats = log.stats().await;
        assert_eq!(stats.router_counts["fast"], 2);
        assert_eq!(stats.router_counts["economy"], 1);
    }

    #[test]
    fn entry_records_success_flag() {
        let ok = make_entry("t", 0);
        let mut err = make_entry("t", 0);
        err.success = false;
        assert!(ok.success);
        assert!(!err.success);
    }
}
