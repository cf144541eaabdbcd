//! Model Registry (C4): the catalogue of routers and providers everything
//! else in the dispatch pipeline reads from.
//!
//! Holds a single writer lock over the whole catalogue (`std::sync::RwLock`)
//! so every mutation — admin CRUD, provider admission — is serialized and
//! every reader sees a consistent `(routers, providers, name indexes)`
//! snapshot for the duration of one dispatch, mirroring the
//! `Arc<RwLock<Arc<Config>>>` pattern this crate's config loader also uses.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::balancer::LoadBalancingStrategy;
use crate::error::{AppError, ErrorKind};
use crate::limiter::RouterLimits;
use crate::qos::QosMetric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterType {
    TextGeneration,
    ImageTextToText,
    TextEmbeddingsInference,
    AutomaticSpeechRecognition,
    TextClassification,
    ImageToText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Vllm,
    OpenAi,
    Mistral,
    Albert,
    Tei,
}

impl ProviderKind {
    /// Whether this provider dialect can serve the given router type.
    /// `Tei` is reranking/embeddings-only; every other kind speaks the
    /// generation-style endpoints.
    pub fn compatible_with(self, router_type: RouterType) -> bool {
        match self {
            ProviderKind::Tei => matches!(
                router_type,
                RouterType::TextEmbeddingsInference | RouterType::TextClassification
            ),
            _ => true,
        }
    }
}

/// A configured upstream endpoint. QoS parameters, carbon-accounting
/// parameter counts, and the electricity zone are all optional — the
/// absence of any of them simply disables that feature for this provider,
/// per the contracts of C6/C9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: u64,
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// The model name this provider is configured to serve upstream.
    pub model_name: String,
    #[serde(default)]
    pub active_params_b: Option<f64>,
    #[serde(default)]
    pub total_params_b: Option<f64>,
    #[serde(default)]
    pub electricity_zone: Option<String>,
    #[serde(default)]
    pub vector_size: Option<u64>,
    #[serde(default)]
    pub max_context_length: Option<u64>,
    /// QoS metric this provider is gated on (C6). Absent alongside
    /// `qos_limit` means this provider is never rejected on QoS grounds.
    #[serde(default)]
    pub qos_metric: Option<QosMetric>,
    #[serde(default)]
    pub qos_limit: Option<f64>,
}

impl Provider {
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_ref().and_then(|v| std::env::var(v).ok())
    }
}

/// A named route: a user-facing model identity backed by one or more
/// providers, load-balanced and QoS-gated as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Router {
    pub id: u64,
    pub name: String,
    pub aliases: Vec<String>,
    pub router_type: RouterType,
    pub load_balancing_strategy: LoadBalancingStrategy,
    /// Metric `least_busy` compares across candidates; unused by `shuffle`.
    /// Defaults to `ttft`, matching `load_balancing_metric`'s default in
    /// the load balancer this crate's is modeled on.
    #[serde(default)]
    pub load_balancing_metric: QosMetric,
    pub provider_ids: Vec<u64>,
    pub cost_prompt_tokens: f64,
    pub cost_completion_tokens: f64,
    #[serde(default)]
    pub limits: HashMap<u64, RouterLimits>,
}

#[derive(Default)]
struct RegistryInner {
    routers: HashMap<u64, Router>,
    providers: HashMap<u64, Provider>,
    by_name: HashMap<String, u64>,
    by_alias: HashMap<String, u64>,
}

impl RegistryInner {
    fn reindex(&mut self) {
        self.by_name.clear();
        self.by_alias.clear();
        for r in self.routers.values() {
            self.by_name.insert(r.name.clone(), r.id);
            for alias in &r.aliases {
                self.by_alias.insert(alias.clone(), r.id);
            }
        }
    }
}

/// The Model Registry (C4). Cloning a `Registry` is cheap (`Arc` handles);
/// every read takes a snapshot `Arc` of the inner catalogue so it observes
/// a consistent view even if a concurrent write follows immediately after.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner::default())),
        }
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a caller-supplied model string to a router, by exact name
    /// first and then by alias — mirrors `resolve_tier`'s alias-or-direct
    /// lookup in the teacher config.
    pub fn resolve(&self, name: &str) -> Result<Router, AppError> {
        let inner = self.inner.read().unwrap();
        let id = inner
            .by_name
            .get(name)
            .or_else(|| inner.by_alias.get(name))
            .copied()
            .ok_or_else(|| ErrorKind::ModelNotFound(name.to_string()))?;
        inner
            .routers
            .get(&id)
            .cloned()
            .ok_or_else(|| ErrorKind::RouterInconsistency.into())
    }

    pub fn provider(&self, id: u64) -> Result<Provider, AppError> {
        self.inner
            .read()
            .unwrap()
            .providers
            .get(&id)
            .cloned()
            .ok_or(ErrorKind::RouterInconsistency.into())
    }

    /// Every provider id configured for `router`, in registry order.
    pub fn candidates(&self, router: &Router) -> Vec<u64> {
        router.provider_ids.clone()
    }

    pub fn list_routers(&self) -> Vec<Router> {
        self.inner.read().unwrap().routers.values().cloned().collect()
    }

    pub fn list_providers(&self) -> Vec<Provider> {
        self.inner.read().unwrap().providers.values().cloned().collect()
    }

    /// Insert or replace a provider. Does not validate router references —
    /// callers add providers before the routers that reference them, same
    /// as the YAML config loader does.
    pub fn put_provider(&self, provider: Provider) {
        self.inner.write().unwrap().providers.insert(provider.id, provider);
    }

    /// Insert or replace a router, enforcing name/alias uniqueness against
    /// every *other* router and that every referenced provider exists and
    /// is type-compatible.
    pub fn put_router(&self, router: Router) -> Result<(), AppError> {
        let mut inner = self.inner.write().unwrap();

        for (other_id, other) in inner.routers.iter() {
            if *other_id == router.id {
                continue;
            }
            if other.name == router.name || router.aliases.contains(&other.name) {
                return Err(ErrorKind::RouterInconsistency.into());
            }
            for alias in &router.aliases {
                if &other.name == alias || other.aliases.contains(alias) {
                    return Err(ErrorKind::RouterInconsistency.into());
                }
            }
        }

        for pid in &router.provider_ids {
            match inner.providers.get(pid) {
                Some(p) if p.kind.compatible_with(router.router_type) => {}
                Some(_) => return Err(ErrorKind::RouterInconsistency.into()),
                None => return Err(ErrorKind::RouterInconsistency.into()),
            }
        }

        inner.routers.insert(router.id, router);
        inner.reindex();
        Ok(())
    }

    pub fn remove_router(&self, id: u64) {
        let mut inner = self.inner.write().unwrap();
        inner.routers.remove(&id);
        inner.reindex();
    }

    pub fn remove_provider(&self, id: u64) {
        self.inner.write().unwrap().providers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_provider(id: u64) -> Provider {
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
            qos_metric: None,
            qos_limit: None,
        }
    }

    fn sample_router(id: u64, provider_ids: Vec<u64>) -> Router {
        Router {
            id,
            name: format!("router-{id}"),
            aliases: vec![format!("alias-{id}")],
            router_type: RouterType::TextGeneration,
            load_balancing_strategy: LoadBalancingStrategy::Shuffle,
            load_balancing_metric: QosMetric::Ttft,
            provider_ids,
            cost_prompt_tokens: 0.0,
            cost_completion_tokens: 0.0,
            limits: HashMap::new(),
        }
    }

    #[test]
    fn resolve_by_name_and_alias() {
        let reg = Registry::new();
        reg.put_provider(sample_provider(1));
        reg.put_router(sample_router(1, vec![1])).unwrap();
        assert_eq!(reg.resolve("router-1").unwrap().id, 1);
        assert_eq!(reg.resolve("alias-1").unwrap().id, 1);
    }

    #[test]
    fn resolve_unknown_model_is_not_found() {
        let reg = Registry::new();
        let err = reg.resolve("nonexistent").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ModelNotFound(_)));
    }

    #[test]
    fn router_referencing_missing_provider_is_rejected() {
        let reg = Registry::new();
        let err = reg.put_router(sample_router(1, vec![99])).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RouterInconsistency));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let reg = Registry::new();
        reg.put_provider(sample_provider(1));
        reg.put_router(sample_router(1, vec![1])).unwrap();
        let mut dup = sample_router(2, vec![1]);
        dup.name = "router-1".to_string();
        let err = reg.put_router(dup).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RouterInconsistency));
    }

    #[test]
    fn incompatible_provider_type_is_rejected() {
        let reg = Registry::new();
        let mut tei = sample_provider(1);
        tei.kind = ProviderKind::Tei;
        reg.put_provider(tei);
        let err = reg.put_router(sample_router(1, vec![1])).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::RouterInconsistency));
    }

    #[test]
    fn remove_router_drops_its_indexes() {
        let reg = Registry::new();
        reg.put_provider(sample_provider(1));
        reg.put_router(sample_router(1, vec![1])).unwrap();
        reg.remove_router(1);
        assert!(reg.resolve("router-1").is_err());
    }
}
