//! Engine configuration with tuned defaults.
//!
//! [`EngineConfig`] groups the settings of every component. All structs
//! deserialise with `#[serde(default)]`, so a partial TOML or JSON section
//! only overrides the fields it names. Call [`EngineConfig::validate`]
//! before building a router.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::RoutingFailure;
use crate::gatekeeper::ProviderLimits;
use crate::strategy::StopPolicy;
use crate::types::StrategyKind;

const MAX_RESULTS_CAP: usize = 50;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on merged results per query; larger requests are clamped.
    pub max_results: usize,
    /// Strategy used when neither a hint nor classification picks one.
    pub default_strategy: StrategyKind,
    /// Summed per-query cost of the candidates (USD) above which a query
    /// is treated as cost-sensitive and routed through the cascade.
    pub cascade_cost_threshold: f64,
    /// Limits for providers without their own entry.
    pub default_limits: ProviderLimits,
    pub circuit_breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub merger: MergerConfig,
    pub deadline: DeadlineConfig,
    pub scorer: ScorerConfig,
    pub cascade: CascadeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_results: MAX_RESULTS_CAP,
            default_strategy: StrategyKind::Parallel,
            cascade_cost_threshold: 0.02,
            default_limits: ProviderLimits::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            merger: MergerConfig::default(),
            deadline: DeadlineConfig::default(),
            scorer: ScorerConfig::default(),
            cascade: CascadeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validates this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RoutingFailure::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), RoutingFailure> {
        if self.max_results == 0 {
            return Err(RoutingFailure::Config(
                "max_results must be greater than 0".into(),
            ));
        }
        if self.cascade_cost_threshold < 0.0 {
            return Err(RoutingFailure::Config(
                "cascade_cost_threshold must be non-negative".into(),
            ));
        }
        self.default_limits
            .validate()
            .and_then(|()| self.circuit_breaker.validate())
            .and_then(|()| self.cache.validate())
            .and_then(|()| self.merger.validate())
            .and_then(|()| self.deadline.validate())
            .and_then(|()| self.scorer.validate())
            .and_then(|()| self.cascade.validate())
            .map_err(RoutingFailure::Config)
    }
}

/// Tiered cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL cap for the in-process tier.
    pub memory_ttl_secs: u64,
    /// TTL for the distributed tier; also the default entry TTL.
    pub distributed_ttl_secs: u64,
    /// Maximum entries in the in-process tier.
    pub memory_capacity: u64,
    /// Upper bound on any single distributed backend call.
    pub distributed_timeout_ms: u64,
    /// How long an unreachable distributed tier is skipped before probing again.
    pub probe_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            memory_ttl_secs: 300,
            distributed_ttl_secs: 3_600,
            memory_capacity: 10_000,
            distributed_timeout_ms: 50,
            probe_interval_secs: 30,
        }
    }
}

impl CacheConfig {
    pub fn memory_ttl(&self) -> Duration {
        Duration::from_secs(self.memory_ttl_secs)
    }

    pub fn distributed_ttl(&self) -> Duration {
        Duration::from_secs(self.distributed_ttl_secs)
    }

    pub fn distributed_timeout(&self) -> Duration {
        Duration::from_millis(self.distributed_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.memory_ttl_secs > self.distributed_ttl_secs {
            return Err("cache.memory_ttl_secs must be <= distributed_ttl_secs".into());
        }
        if self.memory_capacity == 0 {
            return Err("cache.memory_capacity must be greater than 0".into());
        }
        if self.distributed_timeout_ms == 0 {
            return Err("cache.distributed_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// Dedup thresholds and composite ranking weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Minimum title similarity for the fuzzy stage.
    pub fuzzy_title_threshold: f64,
    /// Minimum URL similarity for the fuzzy stage when hosts differ.
    pub fuzzy_url_threshold: f64,
    /// Minimum snippet cosine similarity for the content stage.
    pub content_threshold: f64,
    /// Snippets shorter than this many terms skip the content stage.
    pub min_content_terms: usize,
    /// Score boost per additional contributing provider.
    pub boost_per_provider: f64,
    pub max_boost: f64,
    pub recency_weight: f64,
    pub recency_half_life_hours: f64,
    pub credibility_weight: f64,
    /// Credibility by host, overriding the provider default.
    pub domain_credibility: BTreeMap<String, f64>,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            fuzzy_title_threshold: 0.9,
            fuzzy_url_threshold: 0.85,
            content_threshold: 0.85,
            min_content_terms: 6,
            boost_per_provider: 0.2,
            max_boost: 1.6,
            recency_weight: 0.3,
            recency_half_life_hours: 72.0,
            credibility_weight: 0.2,
            domain_credibility: BTreeMap::new(),
        }
    }
}

impl MergerConfig {
    pub fn validate(&self) -> Result<(), String> {
        let unit = [
            ("fuzzy_title_threshold", self.fuzzy_title_threshold),
            ("fuzzy_url_threshold", self.fuzzy_url_threshold),
            ("content_threshold", self.content_threshold),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("merger.{name} must be within [0, 1]"));
            }
        }
        if let Some((host, _)) = self
            .domain_credibility
            .iter()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(format!("merger.domain_credibility[{host}] must be within [0, 1]"));
        }
        if self.max_boost < 1.0 {
            return Err("merger.max_boost must be >= 1.0".into());
        }
        if self.recency_half_life_hours <= 0.0 {
            return Err("merger.recency_half_life_hours must be positive".into());
        }
        if self.recency_weight < 0.0 || self.credibility_weight < 0.0 || self.boost_per_provider < 0.0 {
            return Err("merger weights must be non-negative".into());
        }
        Ok(())
    }
}

/// Overall query deadline derived from query complexity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    pub base_ms: u64,
    /// Added for each term past the first.
    pub per_term_ms: u64,
    /// Added once for structured queries (quotes, operators).
    pub structured_bonus_ms: u64,
    /// Added per facet past the first.
    pub facet_bonus_ms: u64,
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            per_term_ms: 100,
            structured_bonus_ms: 500,
            facet_bonus_ms: 750,
            min_ms: 500,
            max_ms: 10_000,
        }
    }
}

impl DeadlineConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.min_ms == 0 {
            return Err("deadline.min_ms must be greater than 0".into());
        }
        if self.min_ms > self.max_ms {
            return Err("deadline.min_ms must be <= max_ms".into());
        }
        Ok(())
    }
}

/// Default provider scorer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Smoothing factor for the performance moving averages.
    pub ema_alpha: f64,
    /// Latency at which the latency factor halves.
    pub latency_reference_ms: f64,
    pub cost_sensitivity: f64,
    /// Per-query cost (USD) that counts as "one unit" of cost.
    pub cost_reference: f64,
    /// Affinity for providers that declare neither the content type nor `web`.
    pub default_affinity: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            ema_alpha: 0.3,
            latency_reference_ms: 1_000.0,
            cost_sensitivity: 1.0,
            cost_reference: 0.01,
            default_affinity: 0.5,
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err("scorer.ema_alpha must be within (0, 1]".into());
        }
        if self.latency_reference_ms <= 0.0 || self.cost_reference <= 0.0 {
            return Err("scorer reference values must be positive".into());
        }
        if self.cost_sensitivity < 0.0 {
            return Err("scorer.cost_sensitivity must be non-negative".into());
        }
        if !(0.0..=1.0).contains(&self.default_affinity) {
            return Err("scorer.default_affinity must be within [0, 1]".into());
        }
        Ok(())
    }
}

/// Cascade strategy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub stop_policy: StopPolicy,
    /// Smallest per-call slice handed to a cascade step.
    pub min_slice_ms: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            stop_policy: StopPolicy::FirstSuccess,
            min_slice_ms: 250,
        }
    }
}

impl CascadeConfig {
    pub fn min_slice(&self) -> Duration {
        Duration::from_millis(self.min_slice_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let StopPolicy::EnoughResults { min_results, .. } = self.stop_policy {
            if min_results == 0 {
                return Err("cascade.stop_policy.min_results must be greater than 0".into());
            }
        }
        Ok(())
    }
}
