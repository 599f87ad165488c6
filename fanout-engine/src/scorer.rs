//! Provider scoring and candidate ranking.
//!
//! [`ProviderScorer`] is the pluggable seam: the router holds one scorer
//! chosen at construction time and never inspects how it works.
//! [`DefaultScorer`] multiplies content-type affinity by a historical
//! performance factor from the [`PerformanceTracker`] and a cost penalty.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ScorerConfig;
use crate::registry::ProviderDescriptor;
use crate::types::{ContentType, Query};

/// Ranks a provider for a query. Higher is better.
pub trait ProviderScorer: Send + Sync {
    fn score(&self, query: &Query, content_type: ContentType, provider: &ProviderDescriptor) -> f64;
}

/// Moving averages of one provider's recent calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    /// EMA of success (1.0) and failure (0.0).
    pub success_rate: f64,
    /// EMA of call latency in milliseconds.
    pub latency_ms: f64,
    pub samples: u64,
}

/// Per-provider exponential moving averages, updated after every call.
#[derive(Debug)]
pub struct PerformanceTracker {
    alpha: f64,
    stats: RwLock<HashMap<String, PerformanceStats>>,
}

impl PerformanceTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(f64::MIN_POSITIVE, 1.0),
            stats: RwLock::new(HashMap::new()),
        }
    }

    /// Fold one call outcome (timeouts count as failures) into the averages.
    pub fn record(&self, provider: &str, success: bool, latency: Duration) {
        let sample = if success { 1.0 } else { 0.0 };
        let latency_ms = latency.as_secs_f64() * 1_000.0;
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats
            .entry(provider.to_owned())
            .and_modify(|s| {
                s.success_rate += self.alpha * (sample - s.success_rate);
                s.latency_ms += self.alpha * (latency_ms - s.latency_ms);
                s.samples += 1;
            })
            .or_insert(PerformanceStats {
                success_rate: sample,
                latency_ms,
                samples: 1,
            });
    }

    pub fn stats(&self, provider: &str) -> Option<PerformanceStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .copied()
    }

    pub fn snapshot(&self) -> BTreeMap<String, PerformanceStats> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn reset(&self, provider: &str) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(provider);
    }
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new(ScorerConfig::default().ema_alpha)
    }
}

/// Affinity × performance × cost penalty.
#[derive(Debug)]
pub struct DefaultScorer {
    config: ScorerConfig,
    tracker: Arc<PerformanceTracker>,
}

impl DefaultScorer {
    pub fn new(config: ScorerConfig, tracker: Arc<PerformanceTracker>) -> Self {
        Self { config, tracker }
    }

    fn affinity(&self, content_type: ContentType, provider: &ProviderDescriptor) -> f64 {
        provider
            .affinity(content_type)
            .or_else(|| provider.affinity(ContentType::Web))
            .unwrap_or(self.config.default_affinity)
    }

    /// 1.0 for providers with no history.
    fn performance(&self, provider: &str) -> f64 {
        self.tracker.stats(provider).map_or(1.0, |s| {
            let latency_factor = 1.0 / (1.0 + s.latency_ms / self.config.latency_reference_ms);
            s.success_rate * (0.5 + 0.5 * latency_factor)
        })
    }

    fn cost_penalty(&self, query: &Query, provider: &ProviderDescriptor) -> f64 {
        if query.hints().prioritize_quality {
            return 1.0;
        }
        let cost = provider.cost.estimate(query.max_results());
        1.0 / (1.0 + self.config.cost_sensitivity * cost / self.config.cost_reference)
    }
}

impl ProviderScorer for DefaultScorer {
    fn score(&self, query: &Query, content_type: ContentType, provider: &ProviderDescriptor) -> f64 {
        self.affinity(content_type, provider)
            * self.performance(&provider.id)
            * self.cost_penalty(query, provider)
    }
}

/// A provider with its score for one query.
#[derive(Debug, Clone)]
pub struct ScoredProvider {
    pub descriptor: ProviderDescriptor,
    pub score: f64,
    /// Estimated cost of this call.
    pub estimated_cost: f64,
}

/// Score and order candidates: higher score first, then lower estimated
/// cost, then provider id.
pub fn rank_candidates(
    scorer: &dyn ProviderScorer,
    query: &Query,
    content_type: ContentType,
    candidates: Vec<ProviderDescriptor>,
) -> Vec<ScoredProvider> {
    let mut scored: Vec<ScoredProvider> = candidates
        .into_iter()
        .map(|descriptor| {
            let score = scorer.score(query, content_type, &descriptor);
            let estimated_cost = descriptor.cost.estimate(query.max_results());
            ScoredProvider {
                descriptor,
                score: if score.is_finite() { score } else { 0.0 },
                estimated_cost,
            }
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.estimated_cost
                    .partial_cmp(&b.estimated_cost)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CostModel;

    fn scorer() -> (DefaultScorer, Arc<PerformanceTracker>) {
        let tracker = Arc::new(PerformanceTracker::new(0.5));
        (DefaultScorer::new(ScorerConfig::default(), Arc::clone(&tracker)), tracker)
    }

    #[test]
    fn affinity_drives_score() {
        let (scorer, _) = scorer();
        let query = Query::new("borrow checker internals");
        let code = ProviderDescriptor::new("github").with_affinity(ContentType::Code, 0.9);
        let scholar = ProviderDescriptor::new("scholar").with_affinity(ContentType::Code, 0.3);
        assert!(
            scorer.score(&query, ContentType::Code, &code) > scorer.score(&query, ContentType::Code, &scholar)
        );
    }

    #[test]
    fn affinity_falls_back_to_web_then_default() {
        let (scorer, _) = scorer();
        let query = Query::new("q");
        let web_only = ProviderDescriptor::new("a").with_affinity(ContentType::Web, 0.8);
        let bare = ProviderDescriptor::new("b");
        assert!((scorer.score(&query, ContentType::Media, &web_only) - 0.8).abs() < f64::EPSILON);
        assert!((scorer.score(&query, ContentType::Media, &bare) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn cost_penalty_unless_quality_prioritised() {
        let (scorer, _) = scorer();
        let paid = ProviderDescriptor::new("paid")
            .with_affinity(ContentType::Web, 1.0)
            .with_cost(CostModel::per_query(0.01));
        let query = Query::new("q");
        assert!((scorer.score(&query, ContentType::Web, &paid) - 0.5).abs() < 1e-9);
        let quality = Query::new("q").prioritize_quality();
        assert!((scorer.score(&quality, ContentType::Web, &paid) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tracker_ema_updates() {
        let tracker = PerformanceTracker::new(0.5);
        tracker.record("exa", true, Duration::from_millis(100));
        tracker.record("exa", false, Duration::from_millis(300));
        let stats = tracker.stats("exa").expect("recorded");
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((stats.latency_ms - 200.0).abs() < 1e-9);
        assert_eq!(stats.samples, 2);
        tracker.reset("exa");
        assert!(tracker.stats("exa").is_none());
    }

    #[test]
    fn failures_lower_score() {
        let (scorer, tracker) = scorer();
        let query = Query::new("q");
        let provider = ProviderDescriptor::new("flaky").with_affinity(ContentType::Web, 1.0);
        let before = scorer.score(&query, ContentType::Web, &provider);
        tracker.record("flaky", false, Duration::from_millis(5_000));
        assert!(scorer.score(&query, ContentType::Web, &provider) < before);
    }

    #[test]
    fn rank_tie_break_cost_then_id() {
        let (scorer, _) = scorer();
        let query = Query::new("q").prioritize_quality();
        let candidates = vec![
            ProviderDescriptor::new("zeta").with_affinity(ContentType::Web, 0.7),
            ProviderDescriptor::new("beta")
                .with_affinity(ContentType::Web, 0.7)
                .with_cost(CostModel::per_query(0.002)),
            ProviderDescriptor::new("alpha")
                .with_affinity(ContentType::Web, 0.7)
                .with_cost(CostModel::per_query(0.002)),
            ProviderDescriptor::new("top").with_affinity(ContentType::Web, 0.9),
        ];
        let ranked = rank_candidates(&scorer, &query, ContentType::Web, candidates);
        let ids: Vec<_> = ranked.iter().map(|s| s.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "zeta", "alpha", "beta"]);
    }
}
