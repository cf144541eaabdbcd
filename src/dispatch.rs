//! Priority Queue / Dispatcher (C7): selects an admitted provider for a
//! router, either immediately (`Direct`) or through a bounded retry loop
//! backed by an in-process priority queue (`Queued`).
//!
//! Grounded on the Celery task bodies this crate's dispatcher replaces
//! (`apply_routing` / `apply_load_balancing_and_qos_policy_with_queuing`):
//! the same retry/timeout/crash taxonomy, reimplemented without an
//! external broker — one `tokio::sync::mpsc` channel per router, fed by a
//! fixed worker pool, ordering submissions by priority then arrival order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::balancer::{self, LoadBalancingStrategy};
use crate::error::{AppError, ErrorKind};
use crate::metrics::MetricStore;
use crate::qos;
use crate::registry::{Registry, Router};

/// Select then admit one candidate provider, without retrying. The QoS
/// metric/limit are the *selected* provider's own attributes, looked up
/// from the registry after the load balancer picks a candidate — QoS is a
/// per-provider property, not a policy imposed from outside the router.
/// Used both directly (`QueueMode::Direct`) and as the per-attempt body of
/// the queued dispatcher.
async fn select_and_admit(
    router: &Router,
    registry: &Registry,
    store: &Arc<dyn MetricStore>,
) -> Option<u64> {
    let candidates = router.provider_ids.clone();
    if candidates.is_empty() {
        return None;
    }
    let (picked, _indicator) = balancer::select(&candidates, router.load_balancing_strategy, router.load_balancing_metric, store).await;
    let provider = registry.provider(picked).ok()?;
    if qos::admit(store, picked, provider.qos_metric, provider.qos_limit).await {
        Some(picked)
    } else {
        None
    }
}

/// `Direct` mode: select+admit once, 503 immediately on reject.
pub async fn dispatch_direct(
    router: &Router,
    registry: &Registry,
    store: &Arc<dyn MetricStore>,
) -> Result<u64, AppError> {
    select_and_admit(router, registry, store)
        .await
        .ok_or_else(|| ErrorKind::UpstreamOverloaded.into())
}

struct QueuedTask {
    priority: i64,
    sequence: u64,
    router: Router,
    registry: Registry,
    reply: oneshot::Sender<Result<u64, AppError>>,
    cancelled: Arc<Notify>,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedTask {}
impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap by priority, then earliest sequence wins ties (FIFO
        // within a priority level).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// One router's priority queue plus the wake signal its workers block on.
struct RouterQueue {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
}

/// In-process priority-queue dispatcher. One [`RouterQueue`] per router,
/// created lazily on first submission; a fixed pool of worker tasks polls
/// every queue round-robin.
pub struct QueuedDispatcher {
    store: Arc<dyn MetricStore>,
    queues: Arc<DashMap<u64, Arc<RouterQueue>>>,
    sequence: AtomicU64,
    max_retries: u32,
    retry_countdown: Duration,
}

impl QueuedDispatcher {
    pub fn new(store: Arc<dyn MetricStore>, max_retries: u32, retry_countdown: Duration, worker_count: usize) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            store,
            queues: Arc::new(DashMap::new()),
            sequence: AtomicU64::new(0),
            max_retries,
            retry_countdown,
        });
        for _ in 0..worker_count.max(1) {
            let d = dispatcher.clone();
            tokio::spawn(async move { d.run_worker().await });
        }
        dispatcher
    }

    fn queue_for(&self, router_id: u64) -> Arc<RouterQueue> {
        self.queues
            .entry(router_id)
            .or_insert_with(|| {
                Arc::new(RouterQueue {
                    heap: Mutex::new(BinaryHeap::new()),
                    notify: Notify::new(),
                })
            })
            .clone()
    }

    /// Submit a dispatch request and wait for a result, bounded by
    /// `max_retries * retry_countdown` plus slack. Cancellation (dropping
    /// the returned future) signals `cancelled` so a worker mid-retry stops
    /// instead of wasting attempts on an abandoned caller.
    pub async fn submit(&self, router: Router, registry: Registry, priority: i64) -> Result<u64, AppError> {
        let (tx, rx) = oneshot::channel();
        let sequence = self.sequence.fetch_add(1, AtomicOrdering::Relaxed);
        let cancelled = Arc::new(Notify::new());
        let router_id = router.id;
        let queue = self.queue_for(router_id);

        {
            let mut heap = queue.heap.lock().unwrap();
            heap.push(QueuedTask {
                priority,
                sequence,
                router,
                registry,
                reply: tx,
                cancelled: cancelled.clone(),
            });
        }
        queue.notify.notify_one();

        let budget = self.retry_countdown * (self.max_retries + 1) + Duration::from_secs(5);
        let result = tokio::time::timeout(budget, rx).await;
        match result {
            Ok(Ok(r)) => r,
            Ok(Err(_)) => Err(ErrorKind::Internal("dispatch worker terminated unexpectedly".into()).into()),
            Err(_) => {
                cancelled.notify_one();
                Err(ErrorKind::DispatchTimeout.into())
            }
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let mut made_progress = false;
            for entry in self.queues.iter() {
                let queue = entry.value().clone();
                let task = { queue.heap.lock().unwrap().pop() };
                if let Some(task) = task {
                    made_progress = true;
                    self.clone().run_task(task).await;
                }
            }
            if !made_progress {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    async fn run_task(self: Arc<Self>, task: QueuedTask) {
        if task.reply.is_closed() {
            return;
        }
        for attempt in 0..=self.max_retries {
            if task.reply.is_closed() {
                return;
            }
            match select_and_admit(&task.router, &task.registry, &self.store).await {
                Some(provider_id) => {
                    let _ = task.reply.send(Ok(provider_id));
                    return;
                }
                None if attempt == self.max_retries => {
                    let _ = task.reply.send(Err(ErrorKind::UpstreamOverloaded.into()));
                    return;
                }
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_countdown) => {}
                        _ = task.cancelled.notified() => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancingStrategy;
    use crate::metrics::{names, InMemoryMetricStore};
    use crate::qos::QosMetric;
    use crate::registry::{Provider, ProviderKind, RouterType};
    use std::collections::HashMap;

    fn router(provider_ids: Vec<u64>) -> Router {
        Router {
            id: 1,
            name: "r".into(),
            aliases: vec![],
            router_type: RouterType::TextGeneration,
            load_balancing_strategy: LoadBalancingStrategy::Shuffle,
            load_balancing_metric: QosMetric::Ttft,
            provider_ids,
            cost_prompt_tokens: 0.0,
            cost_completion_tokens: 0.0,
            limits: HashMap::new(),
        }
    }

    fn provider(id: u64, qos_metric: Option<QosMetric>, qos_limit: Option<f64>) -> Provider {
        Provider {
            id,
            name: format!("provider-{id}"),
            kind: ProviderKind::OpenAi,
            base_url: "http://localhost:8000".into(),
            api_key_env: None,
            model_name: "gpt-4o".into(),
            active_params_b: None,
            total_params_b: None,
            electricity_zone: None,
            vector_size: None,
            max_context_length: None,
            qos_metric,
            qos_limit,
        }
    }

    fn registry_with(providers: Vec<Provider>) -> Registry {
        let registry = Registry::new();
        for p in providers {
            registry.put_provider(p);
        }
        registry
    }

    #[tokio::test]
    async fn direct_mode_admits_with_no_qos_limit() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::default());
        let registry = registry_with(vec![provider(1, None, None), provider(2, None, None)]);
        let r = router(vec![1, 2]);
        let result = dispatch_direct(&r, &registry, &store).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn direct_mode_rejects_when_all_candidates_over_inflight_limit() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::default());
        store.incr(names::INFLIGHT, 1).await;
        store.incr(names::INFLIGHT, 1).await;
        let registry = registry_with(vec![provider(1, Some(QosMetric::Inflight), Some(1.0))]);
        let r = router(vec![1]);
        let result = dispatch_direct(&r, &registry, &store).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn queued_dispatcher_admits_when_capacity_frees_up() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::default());
        store.incr(names::INFLIGHT, 1).await;
        store.incr(names::INFLIGHT, 1).await;
        let dispatcher = QueuedDispatcher::new(store.clone(), 5, Duration::from_millis(20), 2);
        let registry = registry_with(vec![provider(1, Some(QosMetric::Inflight), Some(1.0))]);
        let r = router(vec![1]);

        let store2 = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store2.decr(names::INFLIGHT, 1).await;
        });

        let result = dispatcher.submit(r, registry, 0).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn queued_dispatcher_reports_overloaded_after_max_retries() {
        let store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::default());
        store.incr(names::INFLIGHT, 1).await;
        store.incr(names::INFLIGHT, 1).await;
        let dispatcher = QueuedDispatcher::new(store.clone(), 2, Duration::from_millis(20), 1);
        let registry = registry_with(vec![provider(1, Some(QosMetric::Inflight), Some(1.0))]);
        let r = router(vec![1]);
        let result = dispatcher.submit(r, registry, 0).await;
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UpstreamOverloaded));
    }
}
