//! Shared application state wiring every dispatch-pipeline component
//! together, and the hot-reloadable slice of it (config + registry).
//!
//! Mirrors the teacher's `RouterState`: a single writer lock guarding an
//! `Arc<Config>` snapshot, swapped wholesale on reload so every in-flight
//! request keeps reading the version it started with. The registry gets
//! the same treatment — config hot-reload rebuilds it from scratch and
//! swaps it in, rather than mutating the live catalogue in place.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::access::AccessController;
use crate::api::rate_limit::IpRateLimiter;
use crate::config::{Config, QueueMode};
use crate::dispatch::{self, QueuedDispatcher};
use crate::error::AppError;
use crate::limiter::RateLimiter;
use crate::metrics::{InMemoryMetricStore, MetricStore};
use crate::registry::{Registry, Router};
use crate::tokenizer::Tokenizer;
use crate::traffic::TrafficLog;

/// `Direct` dispatches once per request; `Queued` hands the request to the
/// in-process priority-queue worker pool. Selected once at startup from
/// `Settings::queue_mode` and never changed on hot reload.
pub enum Dispatcher {
    Direct,
    Queued(Arc<QueuedDispatcher>),
}

impl Dispatcher {
    pub async fn dispatch(
        &self,
        router: &Router,
        registry: &Registry,
        store: &Arc<dyn MetricStore>,
        priority: i64,
    ) -> Result<u64, AppError> {
        match self {
            Dispatcher::Direct => dispatch::dispatch_direct(router, registry, store).await,
            Dispatcher::Queued(d) => d.submit(router.clone(), registry.clone(), priority).await,
        }
    }
}

/// Everything a request handler needs, assembled once at startup.
pub struct GatewayState {
    config_lock: RwLock<Arc<Config>>,
    registry_lock: RwLock<Registry>,
    pub config_path: PathBuf,
    pub metric_store: Arc<dyn MetricStore>,
    pub user_limiter: RateLimiter,
    pub ip_limiter: Option<IpRateLimiter>,
    pub access: AccessController,
    pub tokenizer: Arc<Tokenizer>,
    pub traffic: Arc<TrafficLog>,
    pub dispatcher: Dispatcher,
    pub admin_token: Option<String>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: Config, config_path: PathBuf, traffic: Arc<TrafficLog>) -> anyhow::Result<Self> {
        let registry = config.build_registry()?;
        let settings = &config.settings;

        let metric_store: Arc<dyn MetricStore> = Arc::new(InMemoryMetricStore::new(
            Duration::from_secs(settings.metric_retention_secs),
        ));

        let dispatcher = match settings.queue_mode {
            QueueMode::Direct => Dispatcher::Direct,
            QueueMode::Queued => Dispatcher::Queued(QueuedDispatcher::new(
                metric_store.clone(),
                settings.max_retries,
                Duration::from_millis(settings.retry_countdown_ms),
                settings.queue_workers,
            )),
        };

        let signing_key = std::env::var(&settings.token_signing_key_env).unwrap_or_default();
        let master_key = settings
            .master_key_env
            .as_ref()
            .and_then(|v| std::env::var(v).ok());

        Ok(Self {
            config_lock: RwLock::new(Arc::new(config.clone())),
            registry_lock: RwLock::new(registry),
            config_path,
            metric_store,
            user_limiter: RateLimiter::new(settings.rate_limit_strategy),
            ip_limiter: settings.rate_limit_rpm.map(IpRateLimiter::new),
            access: AccessController::new(signing_key.as_bytes(), master_key),
            tokenizer: Arc::new(Tokenizer::new()?),
            traffic,
            dispatcher,
            admin_token: settings
                .admin_token_env
                .as_ref()
                .and_then(|v| std::env::var(v).ok()),
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().unwrap().clone()
    }

    pub fn registry(&self) -> Registry {
        self.registry_lock.read().unwrap().clone()
    }

    /// Rebuild the registry from `new_config` and swap both in atomically
    /// under separate locks. A request already holding a `Registry` clone
    /// keeps dispatching against the snapshot it started with.
    pub fn replace_config(&self, new_config: Config) -> anyhow::Result<()> {
        let registry = new_config.build_registry()?;
        *self.registry_lock.write().unwrap() = registry;
        *self.config_lock.write().unwrap() = Arc::new(new_config);
        Ok(())
    }
}
