//! Core types: queries, per-provider results, and merged results.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Default cap on merged results returned per query.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Kind of content a query is after. Providers declare affinities per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Web,
    News,
    Academic,
    Code,
    Social,
    Media,
}

impl ContentType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::News => "news",
            Self::Academic => "academic",
            Self::Code => "code",
            Self::Social => "social",
            Self::Media => "media",
        }
    }

    pub fn all() -> &'static [ContentType] {
        &[
            Self::Web,
            Self::News,
            Self::Academic,
            Self::Code,
            Self::Social,
            Self::Media,
        ]
    }

    /// Case-insensitive parse of a content type name.
    pub fn parse(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|ct| ct.name() == lower)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the router dispatches to the surviving providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// All candidates concurrently under one shared deadline.
    Parallel,
    /// One candidate at a time, in score order, until the stop policy is met.
    Cascade,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Cascade => "cascade",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "parallel" => Some(Self::Parallel),
            "cascade" => Some(Self::Cascade),
            _ => None,
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller-supplied routing hints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHints {
    pub strategy: Option<StrategyKind>,
    /// Restrict dispatch to these provider ids.
    pub providers: Option<BTreeSet<String>>,
    /// Overall deadline override. Still clamped to the configured maximum.
    pub deadline: Option<Duration>,
    /// Ignore declared cost when scoring providers.
    pub prioritize_quality: bool,
}

/// An incoming search query. Immutable once built.
///
/// Whitespace is collapsed on construction. Providers receive the text
/// with its case intact; a lowercased form backs fingerprinting and
/// classification so equivalent spellings share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    normalized: String,
    content_type: Option<ContentType>,
    include_raw_content: bool,
    time_sensitive: Option<bool>,
    max_results: usize,
    hints: RoutingHints,
    request_id: Option<String>,
}

impl Query {
    pub fn new(text: &str) -> Self {
        Self {
            text: collapse_whitespace(text),
            normalized: collapse_whitespace(text).to_lowercase(),
            content_type: None,
            include_raw_content: false,
            time_sensitive: None,
            max_results: DEFAULT_MAX_RESULTS,
            hints: RoutingHints::default(),
            request_id: None,
        }
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.hints.strategy = Some(strategy);
        self
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hints.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.hints.deadline = Some(deadline);
        self
    }

    pub fn with_raw_content(mut self, include: bool) -> Self {
        self.include_raw_content = include;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn prioritize_quality(mut self) -> Self {
        self.hints.prioritize_quality = true;
        self
    }

    /// Force (or suppress) recency weighting in the final ranking.
    pub fn time_sensitive(mut self, flag: bool) -> Self {
        self.time_sensitive = Some(flag);
        self
    }

    /// Text as providers should receive it.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Lowercased text used for cache keys and classification.
    pub fn normalized_text(&self) -> &str {
        &self.normalized
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    pub fn include_raw_content(&self) -> bool {
        self.include_raw_content
    }

    pub fn time_sensitive_flag(&self) -> Option<bool> {
        self.time_sensitive
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub fn hints(&self) -> &RoutingHints {
        &self.hints
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    /// Number of whitespace-separated terms.
    pub fn term_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A single item returned by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Provider-native relevance score, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl ResultItem {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: String::new(),
            raw_content: None,
            native_score: None,
            published_at: None,
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn with_raw_content(mut self, content: impl Into<String>) -> Self {
        self.raw_content = Some(content.into());
        self
    }

    pub fn with_native_score(mut self, score: f64) -> Self {
        self.native_score = Some(score);
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }
}

/// How a single provider call ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CallOutcome {
    Success,
    Failed(ProviderError),
}

impl CallOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Failed(ProviderError::Timeout))
    }
}

/// Everything one provider call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawProviderResult {
    pub provider: String,
    /// Items in the provider's response order. Empty on failure.
    pub items: Vec<ResultItem>,
    pub outcome: CallOutcome,
    #[serde(with = "duration_ms")]
    pub latency: Duration,
}

impl RawProviderResult {
    pub fn success(provider: impl Into<String>, items: Vec<ResultItem>, latency: Duration) -> Self {
        Self {
            provider: provider.into(),
            items,
            outcome: CallOutcome::Success,
            latency,
        }
    }

    pub fn failure(provider: impl Into<String>, error: ProviderError, latency: Duration) -> Self {
        Self {
            provider: provider.into(),
            items: Vec::new(),
            outcome: CallOutcome::Failed(error),
            latency,
        }
    }
}

/// Dedup stage that collapsed at least one other item into a survivor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupMethod {
    ExactUrl,
    NormalizedUrl,
    Fuzzy,
    Content,
}

/// Where a merged item first appeared: provider response order, then position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemOrigin {
    pub provider_rank: usize,
    pub position: usize,
}

/// A deduplicated, ranked result item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedItem {
    pub url: String,
    pub title: String,
    pub snippet: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Contributing providers; the survivor's own provider first.
    pub providers: Vec<String>,
    /// URLs of items that were collapsed into this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternate_urls: Vec<String>,
    /// Provider-quality-weighted score before composite ranking.
    pub base_score: f64,
    /// Composite ranking score.
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup: Option<DedupMethod>,
    pub origin: ItemOrigin,
}

/// Which cache tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Distributed,
}

/// Per-provider summary attached to a merged result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReport {
    pub provider: String,
    pub outcome: CallOutcome,
    pub items: usize,
    pub latency_ms: u64,
}

/// Final answer for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub items: Vec<MergedItem>,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub providers: Vec<ProviderReport>,
    /// Some providers failed or timed out; the items come from the rest.
    #[serde(default)]
    pub partial: bool,
    pub generated_at: DateTime<Utc>,
    /// Set by the router when the answer came from cache. Never stored.
    #[serde(skip)]
    pub served_from: Option<CacheTier>,
}

impl MergedResult {
    /// Providers that contributed at least one item.
    pub fn contributing_providers(&self) -> BTreeSet<&str> {
        self.items
            .iter()
            .flat_map(|item| item.providers.iter().map(String::as_str))
            .collect()
    }
}

pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
