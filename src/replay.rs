//! Fixture-backed providers.
//!
//! The hub ships no network shims. A fixture file describes, per provider,
//! how long a call takes and what it answers, so routing behaviour can be
//! exercised offline:
//!
//! ```json
//! {
//!   "scholar": { "latency_ms": 120, "items": [{ "url": "https://arxiv.org/abs/1", "title": "Qubits" }] },
//!   "web":     { "latency_ms": 3000, "error": "unreachable" }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use fanout_engine::{CallContext, Provider, ProviderError, Query, ResultItem};
use serde::{Deserialize, Serialize};

use crate::error::{HubError, Result};

/// Failure a fixture provider reports instead of items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureFailure {
    Timeout,
    RateLimited,
    Auth,
    Unreachable,
    Malformed,
}

impl FixtureFailure {
    fn to_error(self, provider: &str) -> ProviderError {
        match self {
            Self::Timeout => ProviderError::Timeout,
            Self::RateLimited => ProviderError::RateLimitedByProvider,
            Self::Auth => ProviderError::AuthFailure(format!("{provider} rejected fixture credentials")),
            Self::Unreachable => ProviderError::Unreachable(format!("{provider} fixture marked unreachable")),
            Self::Malformed => ProviderError::Malformed(format!("{provider} fixture marked malformed")),
        }
    }
}

/// One provider's scripted behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub latency_ms: u64,
    pub items: Vec<ResultItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FixtureFailure>,
}

/// A [`Provider`] that replays a [`Fixture`].
#[derive(Debug, Clone)]
pub struct ReplayProvider {
    id: String,
    fixture: Fixture,
}

impl ReplayProvider {
    pub fn new(id: impl Into<String>, fixture: Fixture) -> Self {
        Self {
            id: id.into(),
            fixture,
        }
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }
}

#[async_trait]
impl Provider for ReplayProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, query: &Query, ctx: CallContext) -> std::result::Result<Vec<ResultItem>, ProviderError> {
        let latency = Duration::from_millis(self.fixture.latency_ms);
        tokio::select! {
            () = ctx.cancel.cancelled() => {
                tracing::debug!(provider = %self.id, "replay call cancelled");
                return Err(ProviderError::Timeout);
            }
            () = tokio::time::sleep(latency) => {}
        }
        if let Some(failure) = self.fixture.error {
            return Err(failure.to_error(&self.id));
        }
        let mut items = self.fixture.items.clone();
        items.truncate(query.max_results());
        if !query.include_raw_content() {
            for item in &mut items {
                item.raw_content = None;
            }
        }
        Ok(items)
    }
}

/// Parse a fixture document into providers, ordered by id.
///
/// # Errors
///
/// Returns [`HubError::Fixture`] when the JSON does not describe fixtures.
pub fn parse_fixtures(json: &str) -> Result<Vec<ReplayProvider>> {
    let fixtures: BTreeMap<String, Fixture> =
        serde_json::from_str(json).map_err(|e| HubError::Fixture(e.to_string()))?;
    if let Some(id) = fixtures.keys().find(|id| id.trim().is_empty()) {
        return Err(HubError::Fixture(format!("invalid provider id {id:?}")));
    }
    Ok(fixtures
        .into_iter()
        .map(|(id, fixture)| ReplayProvider::new(id, fixture))
        .collect())
}

/// Load providers from a fixture file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_fixtures(path: &Path) -> Result<Vec<ReplayProvider>> {
    let content = std::fs::read_to_string(path)?;
    parse_fixtures(&content)
}
