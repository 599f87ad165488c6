//! Result merging: dedup, survivor selection, and composite ranking.
//!
//! # Pipeline
//!
//! 1. Score every returned item: provider quality weight × position decay
//! 2. Collapse duplicates: exact URL, normalised URL, fuzzy title/URL,
//!    snippet content (repeated until stable)
//! 3. Compute the composite score: base × cross-provider boost, plus
//!    recency (time-sensitive queries) and source credibility
//! 4. Sort by composite score, ties by provider response order
//! 5. Truncate to the requested maximum
//!
//! Only items that providers actually returned are considered. Merging an
//! already merged set (for example with [`ResultMerger::reconcile`]) is
//! idempotent.

mod dedup;
mod ranking;
mod similarity;
mod url_normalize;

pub use similarity::{text_similarity, TermVector};
pub use url_normalize::{host_of, normalize_url};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::MergerConfig;
use crate::registry::ProviderDescriptor;
use crate::types::{ItemOrigin, MergedItem, RawProviderResult};

/// Ranking inputs for one provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceWeight {
    pub quality_weight: f64,
    pub credibility: f64,
}

impl Default for SourceWeight {
    fn default() -> Self {
        Self {
            quality_weight: 1.0,
            credibility: 0.5,
        }
    }
}

impl From<&ProviderDescriptor> for SourceWeight {
    fn from(descriptor: &ProviderDescriptor) -> Self {
        Self {
            quality_weight: descriptor.quality_weight,
            credibility: descriptor.credibility,
        }
    }
}

/// Per-query merge parameters.
#[derive(Debug, Clone)]
pub struct MergeContext {
    pub max_results: usize,
    pub time_sensitive: bool,
    pub include_raw_content: bool,
    pub now: DateTime<Utc>,
}

impl MergeContext {
    pub fn new(max_results: usize) -> Self {
        Self {
            max_results,
            time_sensitive: false,
            include_raw_content: false,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultMerger {
    config: MergerConfig,
}

impl ResultMerger {
    pub fn new(config: MergerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Merge raw provider results, given in provider response order.
    pub fn merge(
        &self,
        raw: &[RawProviderResult],
        weights: &BTreeMap<String, SourceWeight>,
        ctx: &MergeContext,
    ) -> Vec<MergedItem> {
        let mut items = Vec::new();
        for (provider_rank, result) in raw.iter().enumerate() {
            let weight = weights.get(&result.provider).copied().unwrap_or_default();
            for (position, item) in result.items.iter().enumerate() {
                if item.url.trim().is_empty() {
                    tracing::trace!(provider = %result.provider, position, "dropping item without url");
                    continue;
                }
                let base = ranking::base_score(weight.quality_weight, position);
                items.push(MergedItem {
                    url: item.url.trim().to_owned(),
                    title: item.title.trim().to_owned(),
                    snippet: item.snippet.trim().to_owned(),
                    raw_content: if ctx.include_raw_content {
                        item.raw_content.clone()
                    } else {
                        None
                    },
                    published_at: item.published_at,
                    providers: vec![result.provider.clone()],
                    alternate_urls: Vec::new(),
                    base_score: base,
                    score: base,
                    dedup: None,
                    origin: ItemOrigin {
                        provider_rank,
                        position,
                    },
                });
            }
        }
        let total = items.len();
        let ranked = self.rank(items, weights, ctx);
        tracing::debug!(
            raw_items = total,
            merged_items = ranked.len(),
            "merged provider results"
        );
        ranked
    }

    /// Merge two already merged sets. `b`'s items rank after `a`'s on ties.
    pub fn reconcile(
        &self,
        a: &[MergedItem],
        b: &[MergedItem],
        weights: &BTreeMap<String, SourceWeight>,
        ctx: &MergeContext,
    ) -> Vec<MergedItem> {
        let offset = a
            .iter()
            .map(|item| item.origin.provider_rank + 1)
            .max()
            .unwrap_or(0);
        let items = a
            .iter()
            .cloned()
            .chain(b.iter().cloned().map(|mut item| {
                item.origin.provider_rank += offset;
                item
            }))
            .collect();
        self.rank(items, weights, ctx)
    }

    fn rank(
        &self,
        items: Vec<MergedItem>,
        weights: &BTreeMap<String, SourceWeight>,
        ctx: &MergeContext,
    ) -> Vec<MergedItem> {
        let mut items = dedup::deduplicate(items, &self.config);
        for item in &mut items {
            item.score = ranking::composite(item, weights, &self.config, ctx.time_sensitive, ctx.now);
        }
        ranking::sort_ranked(&mut items);
        items.truncate(ctx.max_results);
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::types::{DedupMethod, ResultItem};
    use std::time::Duration;

    fn raw(provider: &str, pages: &[(&str, &str)]) -> RawProviderResult {
        RawProviderResult::success(
            provider,
            pages
                .iter()
                .map(|(url, title)| ResultItem::new(*url, *title))
                .collect(),
            Duration::from_millis(10),
        )
    }

    fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, SourceWeight> {
        entries
            .iter()
            .map(|(id, w)| {
                (
                    (*id).to_owned(),
                    SourceWeight {
                        quality_weight: *w,
                        credibility: 0.5,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn cross_provider_duplicates_rank_first() {
        let merger = ResultMerger::default();
        let results = vec![
            raw(
                "x",
                &[
                    ("https://a.com/1", "Alpha"),
                    ("https://a.com/2", "Bravo"),
                    ("https://a.com/3", "Charlie"),
                ],
            ),
            raw("y", &[("https://a.com/3", "Charlie"), ("https://b.com/9", "Delta")]),
        ];
        let merged = merger.merge(&results, &weights(&[("x", 1.0), ("y", 1.0)]), &MergeContext::new(10));
        assert_eq!(merged.len(), 4);
        // a.com/3 sits at x:2 but is boosted by y's agreement.
        assert_eq!(merged[0].url, "https://a.com/3");
        assert_eq!(merged[0].providers, vec!["y".to_owned(), "x".to_owned()]);
        assert_eq!(merged[0].dedup, Some(DedupMethod::ExactUrl));
    }

    #[test]
    fn failed_providers_contribute_nothing() {
        let merger = ResultMerger::default();
        let results = vec![
            RawProviderResult::failure("down", ProviderError::Timeout, Duration::from_millis(200)),
            raw("up", &[("https://a.com/1", "Alpha")]),
        ];
        let merged = merger.merge(&results, &BTreeMap::new(), &MergeContext::new(10));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].providers, vec!["up".to_owned()]);
    }

    #[test]
    fn ties_break_by_provider_order() {
        let merger = ResultMerger::default();
        let results = vec![
            raw("x", &[("https://x.com/a", "Borrow checker guide")]),
            raw("y", &[("https://y.com/b", "Lifetime elision rules")]),
        ];
        let merged = merger.merge(&results, &BTreeMap::new(), &MergeContext::new(10));
        assert_eq!(merged[0].url, "https://x.com/a");
        assert_eq!(merged[1].url, "https://y.com/b");
    }

    #[test]
    fn truncates_and_strips_raw_content() {
        let merger = ResultMerger::default();
        let topics = [
            "apple", "bridge", "candle", "dragon", "engine", "forest", "galaxy", "harbor", "island",
            "jungle", "kettle", "lantern", "meadow", "nebula", "orchard",
        ];
        let items = topics
            .iter()
            .map(|t| ResultItem::new(format!("https://{t}.org/"), *t).with_raw_content("body"))
            .collect();
        let results = vec![RawProviderResult::success("x", items, Duration::ZERO)];
        let merged = merger.merge(&results, &BTreeMap::new(), &MergeContext::new(5));
        assert_eq!(merged.len(), 5);
        assert!(merged.iter().all(|m| m.raw_content.is_none()));
    }

    #[test]
    fn merge_is_idempotent() {
        let merger = ResultMerger::default();
        let ctx = MergeContext::new(10);
        let w = weights(&[("x", 1.2), ("y", 0.8)]);
        let results = vec![
            raw("x", &[("https://a.com/1", "Alpha"), ("https://a.com/2/", "Bravo")]),
            raw("y", &[("https://a.com/2", "Bravo"), ("https://c.com/7", "Delta")]),
        ];
        let once = merger.merge(&results, &w, &ctx);
        let twice = merger.reconcile(&once, &once, &w, &ctx);
        assert_eq!(twice, once);
    }
}
