//! Hub configuration: engine settings plus the provider roster.
//!
//! Loaded from TOML. Every section is optional; missing fields fall back
//! to the engine's tuned defaults. A handful of `FANOUT_*` environment
//! variables override the file for quick experiments:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `FANOUT_MAX_RESULTS` | `engine.max_results` |
//! | `FANOUT_STRATEGY` | `engine.default_strategy` (`parallel` or `cascade`) |
//! | `FANOUT_DEADLINE_MS` | `engine.deadline.max_ms`, lowering `min_ms` if needed |
//! | `FANOUT_CACHE_TTL_SECS` | `engine.cache.distributed_ttl_secs`, capping `memory_ttl_secs` |
//! | `FANOUT_CONFIG_DIR` | directory searched for `config.toml` |

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use fanout_engine::{
    ContentType, CostModel, EngineConfig, ProviderDescriptor, ProviderLimits, StrategyKind,
};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Top-level hub configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub engine: EngineConfig,
    pub providers: Vec<ProviderConfig>,
}

/// Declared metadata and limits for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub id: String,
    /// Strength per content type in `[0, 1]`.
    pub affinities: BTreeMap<ContentType, f64>,
    /// USD per call.
    pub cost_per_query: f64,
    /// USD per returned item.
    pub cost_per_result: f64,
    pub timeout_ms: u64,
    pub quality_weight: f64,
    pub credibility: f64,
    pub enabled: bool,
    /// Admission limits; `engine.default_limits` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ProviderLimits>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            affinities: BTreeMap::new(),
            cost_per_query: 0.0,
            cost_per_result: 0.0,
            timeout_ms: 5_000,
            quality_weight: 1.0,
            credibility: 0.5,
            enabled: true,
            limits: None,
        }
    }
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Registry descriptor for this provider.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let mut descriptor = ProviderDescriptor::new(self.id.clone())
            .with_cost(CostModel {
                per_query: self.cost_per_query,
                per_result: self.cost_per_result,
            })
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_quality_weight(self.quality_weight)
            .with_credibility(self.credibility);
        for (content_type, weight) in &self.affinities {
            descriptor = descriptor.with_affinity(*content_type, *weight);
        }
        descriptor.enabled = self.enabled;
        descriptor
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("provider id must not be empty".into());
        }
        let id = &self.id;
        if self.timeout_ms == 0 {
            return Err(format!("providers.{id}.timeout_ms must be greater than 0"));
        }
        if self.cost_per_query < 0.0 || self.cost_per_result < 0.0 {
            return Err(format!("providers.{id} costs must be non-negative"));
        }
        if self.quality_weight <= 0.0 {
            return Err(format!("providers.{id}.quality_weight must be positive"));
        }
        if !(0.0..=1.0).contains(&self.credibility) {
            return Err(format!("providers.{id}.credibility must be within [0, 1]"));
        }
        if let Some((content_type, _)) = self.affinities.iter().find(|(_, w)| !(0.0..=1.0).contains(*w)) {
            return Err(format!("providers.{id}.affinities.{content_type} must be within [0, 1]"));
        }
        if let Some(limits) = &self.limits {
            limits.validate().map_err(|e| format!("providers.{id}: {e}"))?;
        }
        Ok(())
    }
}

impl HubConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| HubError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| HubError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `dirs::config_dir()/fanout/config.toml`.
    ///
    /// `FANOUT_CONFIG_DIR` replaces the directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        let dir = std::env::var_os("FANOUT_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|d| d.join("fanout")))
            .unwrap_or_else(|| PathBuf::from("/tmp/fanout-config"));
        dir.join("config.toml")
    }

    /// Resolve the effective configuration.
    ///
    /// Reads `path` when given, else the default path if it exists, else
    /// starts from defaults. Environment overrides are applied and the
    /// result validated.
    ///
    /// # Errors
    ///
    /// Returns an error if a named file is missing or malformed, an
    /// override does not parse, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    tracing::debug!(path = %default.display(), "loading default config");
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FANOUT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] when a value does not parse.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("FANOUT_MAX_RESULTS") {
            self.engine.max_results = parse_override("FANOUT_MAX_RESULTS", &raw)?;
        }
        if let Some(raw) = lookup("FANOUT_STRATEGY") {
            self.engine.default_strategy = StrategyKind::parse(&raw)
                .ok_or_else(|| HubError::Config(format!("FANOUT_STRATEGY: unknown strategy {raw:?}")))?;
        }
        if let Some(raw) = lookup("FANOUT_DEADLINE_MS") {
            let max_ms: u64 = parse_override("FANOUT_DEADLINE_MS", &raw)?;
            self.engine.deadline.max_ms = max_ms;
            self.engine.deadline.min_ms = self.engine.deadline.min_ms.min(max_ms);
        }
        if let Some(raw) = lookup("FANOUT_CACHE_TTL_SECS") {
            let ttl: u64 = parse_override("FANOUT_CACHE_TTL_SECS", &raw)?;
            self.engine.cache.distributed_ttl_secs = ttl;
            self.engine.cache.memory_ttl_secs = self.engine.cache.memory_ttl_secs.min(ttl);
        }
        Ok(())
    }

    /// Validates engine settings and the provider roster.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.engine
            .validate()
            .map_err(|e| HubError::Config(e.to_string()))?;
        let mut seen = BTreeSet::new();
        for provider in &self.providers {
            provider.validate().map_err(HubError::Config)?;
            if !seen.insert(provider.id.as_str()) {
                return Err(HubError::Config(format!("provider {} listed twice", provider.id)));
            }
        }
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| HubError::Config(format!("{name}: cannot parse {raw:?}")))
}
