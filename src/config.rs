//! Configuration for lm-gateway.
//!
//! Config is a YAML file loaded once at startup and validated before the
//! server opens any ports; invalid configs are rejected with a clear error
//! rather than silently falling back to defaults. Every string value may
//! reference an environment variable with `${VAR}` or `${VAR:-default}`
//! shell-style interpolation, resolved before YAML parsing — this keeps
//! secrets and per-environment values out of the file itself.
//!
//! # Example
//! ```yaml
//! settings:
//!   client_port: 8080
//!   admin_port: 8081
//!   token_signing_key_env: LMG_TOKEN_SIGNING_KEY
//!   master_key_env: LMG_MASTER_KEY
//!
//! providers:
//!   - id: 1
//!     name: vllm-local
//!     kind: vllm
//!     base_url: "${VLLM_URL:-http://localhost:8000}"
//!     model_name: Qwen2.5-7B-Instruct
//!
//! routers:
//!   - id: 1
//!     name: fast
//!     aliases: ["default"]
//!     router_type: text_generation
//!     load_balancing_strategy: shuffle
//!     provider_ids: [1]
//!     cost_prompt_tokens: 0.0
//!     cost_completion_tokens: 0.0
//! ```

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::balancer::LoadBalancingStrategy;
use crate::limiter::{RouterLimits, WindowStrategy};
use crate::qos::QosMetric;
use crate::registry::{Provider, ProviderKind, Registry, Router, RouterType};

/// Ambient gateway settings — ports, logging, queue mode, and the secrets
/// used to authenticate callers and admins.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "defaults::client_port")]
    pub client_port: u16,
    #[serde(default = "defaults::admin_port")]
    pub admin_port: u16,
    #[serde(default = "defaults::traffic_log_capacity")]
    pub traffic_log_capacity: usize,
    #[serde(default)]
    pub log_level: Option<String>,
    /// Ambient per-IP request throttle on the client port, distinct from
    /// the per-(user,router) limiter (C2) applied after authentication.
    #[serde(default)]
    pub rate_limit_rpm: Option<u32>,
    /// Environment variable holding the Bearer token required for all
    /// admin API requests. Unset disables admin authentication.
    #[serde(default)]
    pub admin_token_env: Option<String>,
    /// Environment variable holding the HS256 secret used to verify
    /// caller-presented API tokens.
    pub token_signing_key_env: String,
    /// Environment variable holding the master key value (bypasses the
    /// access controller and every per-user limit).
    #[serde(default)]
    pub master_key_env: Option<String>,
    /// `direct` (select+admit once, 503 on reject) or `queued` (bounded
    /// retry loop via an in-process priority queue).
    #[serde(default)]
    pub queue_mode: QueueMode,
    #[serde(default = "defaults::queue_workers")]
    pub queue_workers: usize,
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::retry_countdown_ms")]
    pub retry_countdown_ms: u64,
    #[serde(default = "defaults::rate_limit_strategy")]
    pub rate_limit_strategy: WindowStrategy,
    #[serde(default = "defaults::metric_retention_secs")]
    pub metric_retention_secs: u64,
    /// Maximum accepted request body size, in bytes (default 20 MiB).
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    #[default]
    Direct,
    Queued,
}

/// Seed data for one provider, as it appears in the YAML file. Maps
/// directly onto [`Provider`]; kept as a distinct type only so `Provider`
/// itself (used by the live registry) doesn't carry serde derives it
/// doesn't need beyond the admin API, which reuses this same shape.
pub type ProviderSeed = Provider;

/// Seed data for one router, as it appears in the YAML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouterSeed {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub router_type: RouterType,
    #[serde(default)]
    pub load_balancing_strategy: LoadBalancingStrategy,
    #[serde(default)]
    pub load_balancing_metric: QosMetric,
    pub provider_ids: Vec<u64>,
    #[serde(default)]
    pub cost_prompt_tokens: f64,
    #[serde(default)]
    pub cost_completion_tokens: f64,
    #[serde(default)]
    pub limits: HashMap<u64, RouterLimits>,
}

impl From<RouterSeed> for Router {
    fn from(s: RouterSeed) -> Self {
        Router {
            id: s.id,
            name: s.name,
            aliases: s.aliases,
            router_type: s.router_type,
            load_balancing_strategy: s.load_balancing_strategy,
            load_balancing_metric: s.load_balancing_metric,
            provider_ids: s.provider_ids,
            cost_prompt_tokens: s.cost_prompt_tokens,
            cost_completion_tokens: s.cost_completion_tokens,
            limits: s.limits,
        }
    }
}

/// Top-level gateway configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub settings: Settings,
    #[serde(default)]
    pub providers: Vec<ProviderSeed>,
    #[serde(default)]
    pub routers: Vec<RouterSeed>,
}

impl Config {
    /// Load, interpolate, parse, and validate a YAML config file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let interpolated = interpolate_env(&raw)?;
        let config: Self = serde_yaml::from_str(&interpolated).context("parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let provider_ids: std::collections::HashSet<u64> =
            self.providers.iter().map(|p| p.id).collect();

        for router in &self.routers {
            for pid in &router.provider_ids {
                anyhow::ensure!(
                    provider_ids.contains(pid),
                    "router `{}` references unknown provider id {}",
                    router.name,
                    pid
                );
            }
            for pid in &router.provider_ids {
                let provider = self.providers.iter().find(|p| p.id == *pid).unwrap();
                anyhow::ensure!(
                    provider.kind.compatible_with(router.router_type),
                    "router `{}` (type {:?}) is not compatible with provider `{}` (kind {:?})",
                    router.name,
                    router.router_type,
                    provider.name,
                    provider.kind
                );
            }
        }

        let mut names = std::collections::HashSet::new();
        for router in &self.routers {
            anyhow::ensure!(names.insert(router.name.clone()), "duplicate router name `{}`", router.name);
            for alias in &router.aliases {
                anyhow::ensure!(names.insert(alias.clone()), "duplicate router name/alias `{}`", alias);
            }
        }

        Ok(())
    }

    /// Build a fresh [`Registry`] seeded with this config's providers and
    /// routers. Called once at startup, and again on every hot reload.
    pub fn build_registry(&self) -> anyhow::Result<Registry> {
        let registry = Registry::new();
        for provider in &self.providers {
            registry.put_provider(provider.clone());
        }
        for router in &self.routers {
            registry.put_router(router.clone().into())?;
        }
        Ok(registry)
    }
}

/// Resolve `${VAR}` / `${VAR:-default}` references against the process
/// environment. Unset variables with no default expand to an empty
/// string, matching common shell behavior for `${VAR:-}`.
pub fn interpolate_env(input: &str) -> anyhow::Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").unwrap();
    let mut err: Option<String> = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        match (std::env::var(var), default) {
            (Ok(v), _) => v,
            (Err(_), Some(d)) => d.to_string(),
            (Err(_), None) => {
                err = Some(var.to_string());
                String::new()
            }
        }
    });
    if let Some(var) = err {
        anyhow::bail!("environment variable `{var}` is not set and has no default");
    }
    Ok(result.into_owned())
}

mod defaults {
    use crate::limiter::WindowStrategy;

    pub fn client_port() -> u16 {
        8080
    }
    pub fn admin_port() -> u16 {
        8081
    }
    pub fn traffic_log_capacity() -> usize {
        500
    }
    pub fn queue_workers() -> usize {
        4
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn retry_countdown_ms() -> u64 {
        250
    }
    pub fn rate_limit_strategy() -> WindowStrategy {
        WindowStrategy::Moving
    }
    pub fn metric_retention_secs() -> u64 {
        3600
    }
    pub fn max_body_bytes() -> usize {
        20 * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> String {
        r#"
settings:
  token_signing_key_env: LMG_TEST_SIGNING_KEY
providers:
  - id: 1
    name: vllm-local
    kind: vllm
    base_url: "http://localhost:8000"
    model_name: qwen2.5-7b
routers:
  - id: 1
    name: fast
    aliases: ["default"]
    router_type: text_generation
    load_balancing_strategy: shuffle
    provider_ids: [1]
"#
        .to_string()
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = serde_yaml::from_str(&minimal_yaml()).expect("should parse");
        config.validate().expect("should be valid");
        assert_eq!(config.settings.client_port, 8080);
        assert_eq!(config.routers[0].provider_ids, vec![1]);
    }

    #[test]
    fn validation_rejects_router_with_unknown_provider() {
        let mut config: Config = serde_yaml::from_str(&minimal_yaml()).unwrap();
        config.routers[0].provider_ids.push(99);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_duplicate_router_names() {
        let mut config: Config = serde_yaml::from_str(&minimal_yaml()).unwrap();
        let mut dup = config.routers[0].clone();
        dup.id = 2;
        config.routers.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_incompatible_provider_type() {
        let mut config: Config = serde_yaml::from_str(&minimal_yaml()).unwrap();
        config.providers[0].kind = ProviderKind::Tei;
        assert!(config.validate().is_err());
    }

    #[test]
    fn build_registry_resolves_router_by_alias() {
        let config: Config = serde_yaml::from_str(&minimal_yaml()).unwrap();
        let registry = config.build_registry().unwrap();
        assert_eq!(registry.resolve("default").unwrap().id, 1);
        assert_eq!(registry.resolve("fast").unwrap().id, 1);
    }

    #[test]
    fn interpolation_uses_env_value_when_set() {
        let var = "LMG_CONFIG_TEST_INTERP_VALUE_1";
        unsafe { std::env::set_var(var, "from-env") };
        let result = interpolate_env("value: \"${LMG_CONFIG_TEST_INTERP_VALUE_1}\"").unwrap();
        assert_eq!(result, "value: \"from-env\"");
        unsafe { std::env::remove_var(var) };
    }

    #[test]
    fn interpolation_falls_back_to_default_when_unset() {
        let result = interpolate_env("value: \"${LMG_CONFIG_TEST_TOTALLY_UNSET:-fallback}\"").unwrap();
        assert_eq!(result, "value: \"fallback\"");
    }

    #[test]
    fn interpolation_errors_when_unset_and_no_default() {
        let err = interpolate_env("value: \"${LMG_CONFIG_TEST_TOTALLY_UNSET_2}\"").unwrap_err();
        assert!(err.to_string().contains("LMG_CONFIG_TEST_TOTALLY_UNSET_2"));
    }
}
