//! Provider capability registry.
//!
//! Holds the declared metadata for every provider the engine may route
//! to: content-type affinities, cost model, timeout hint, ranking weights,
//! and current health. Health is written by the router from circuit
//! breaker transitions; the throttle marker from gatekeeper denials.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::CircuitState;
use crate::error::DenialReason;
use crate::types::ContentType;

/// Coarse provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    #[default]
    Healthy,
    Degraded,
    Unavailable,
}

impl Health {
    pub fn from_circuit(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => Self::Healthy,
            CircuitState::HalfOpen => Self::Degraded,
            CircuitState::Open => Self::Unavailable,
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        })
    }
}

/// Declared monetary cost of calling a provider, in USD.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub per_query: f64,
    pub per_result: f64,
}

impl CostModel {
    pub fn free() -> Self {
        Self::default()
    }

    pub fn per_query(cost: f64) -> Self {
        Self {
            per_query: cost,
            per_result: 0.0,
        }
    }

    /// Estimated cost of one call asking for `results` items.
    pub fn estimate(&self, results: usize) -> f64 {
        self.per_query + self.per_result * results as f64
    }
}

/// Static and semi-static metadata for a single provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    /// Strength per content type in `[0, 1]`.
    pub affinities: BTreeMap<ContentType, f64>,
    pub cost: CostModel,
    #[serde(with = "crate::types::duration_ms")]
    pub base_timeout: Duration,
    /// Weight applied to this provider's items when merging.
    pub quality_weight: f64,
    /// Default credibility of this provider's sources in `[0, 1]`.
    pub credibility: f64,
    pub health: Health,
    /// Operator switch; disabled providers are never dispatched.
    pub enabled: bool,
    /// Last admission denial, cleared on the next successful admission.
    pub throttled: Option<DenialReason>,
}

impl ProviderDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            affinities: BTreeMap::new(),
            cost: CostModel::free(),
            base_timeout: Duration::from_secs(5),
            quality_weight: 1.0,
            credibility: 0.5,
            health: Health::Healthy,
            enabled: true,
            throttled: None,
        }
    }

    pub fn with_affinity(mut self, content_type: ContentType, weight: f64) -> Self {
        self.affinities.insert(content_type, weight.clamp(0.0, 1.0));
        self
    }

    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.base_timeout = timeout;
        self
    }

    pub fn with_quality_weight(mut self, weight: f64) -> Self {
        self.quality_weight = weight;
        self
    }

    pub fn with_credibility(mut self, credibility: f64) -> Self {
        self.credibility = credibility.clamp(0.0, 1.0);
        self
    }

    pub fn affinity(&self, content_type: ContentType) -> Option<f64> {
        self.affinities.get(&content_type).copied()
    }
}

/// Registry of provider descriptors, shared across in-flight queries.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, ProviderDescriptor>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        let registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderDescriptor>> {
        self.providers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ProviderDescriptor>> {
        self.providers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a provider descriptor.
    pub fn register(&self, descriptor: ProviderDescriptor) {
        self.write().insert(descriptor.id.clone(), descriptor);
    }

    pub fn get(&self, id: &str) -> Option<ProviderDescriptor> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// All descriptors, sorted by id.
    pub fn all(&self) -> Vec<ProviderDescriptor> {
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns `false` if the provider is unknown.
    pub fn set_health(&self, id: &str, health: Health) -> bool {
        self.update(id, |d| d.health = health)
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        self.update(id, |d| d.enabled = enabled)
    }

    pub fn mark_throttled(&self, id: &str, reason: DenialReason) -> bool {
        self.update(id, |d| d.throttled = Some(reason))
    }

    pub fn clear_throttled(&self, id: &str) -> bool {
        self.update(id, |d| d.throttled = None)
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut ProviderDescriptor)) -> bool {
        match self.write().get_mut(id) {
            Some(descriptor) => {
                apply(descriptor);
                true
            }
            None => false,
        }
    }
}
