//! Base and composite scoring for merged items.
//!
//! Base score (per raw item, before dedup):
//!
//! ```text
//! base = quality_weight * 1 / (1 + position * 0.1)
//! ```
//!
//! Composite score (per survivor, after dedup):
//!
//! ```text
//! composite = base * min(1 + boost_per_provider * (providers - 1), max_boost)
//!           + recency_weight * 0.5^(age_hours / half_life)     (time-sensitive only)
//!           + credibility_weight * credibility
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::config::MergerConfig;
use crate::types::MergedItem;

use super::url_normalize::host_of;
use super::SourceWeight;

pub(crate) fn position_decay(position: usize) -> f64 {
    1.0 / (1.0 + position as f64 * 0.1)
}

pub(crate) fn base_score(quality_weight: f64, position: usize) -> f64 {
    quality_weight * position_decay(position)
}

pub(crate) fn cross_provider_boost(providers: usize, config: &MergerConfig) -> f64 {
    let extra = providers.saturating_sub(1) as f64;
    (1.0 + config.boost_per_provider * extra).min(config.max_boost)
}

/// Exponential decay by age; future timestamps count as brand new.
pub(crate) fn recency(published_at: DateTime<Utc>, now: DateTime<Utc>, half_life_hours: f64) -> f64 {
    let age_hours = (now - published_at).num_seconds().max(0) as f64 / 3_600.0;
    0.5_f64.powf(age_hours / half_life_hours)
}

/// Domain override first, else the best credibility among contributors.
pub(crate) fn credibility(
    item: &MergedItem,
    weights: &BTreeMap<String, SourceWeight>,
    config: &MergerConfig,
) -> f64 {
    if let Some(score) = host_of(&item.url).and_then(|h| config.domain_credibility.get(&h).copied()) {
        return score;
    }
    item.providers
        .iter()
        .filter_map(|p| weights.get(p).map(|w| w.credibility))
        .fold(None, |best: Option<f64>, c| Some(best.map_or(c, |b| b.max(c))))
        .unwrap_or(SourceWeight::default().credibility)
}

pub(crate) fn composite(
    item: &MergedItem,
    weights: &BTreeMap<String, SourceWeight>,
    config: &MergerConfig,
    time_sensitive: bool,
    now: DateTime<Utc>,
) -> f64 {
    let mut score = item.base_score * cross_provider_boost(item.providers.len(), config);
    if time_sensitive {
        if let Some(published_at) = item.published_at {
            score += config.recency_weight * recency(published_at, now, config.recency_half_life_hours);
        }
    }
    score + config.credibility_weight * credibility(item, weights, config)
}

/// Score descending, then earliest provider response order.
pub(crate) fn sort_ranked(items: &mut [MergedItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.origin.cmp(&b.origin))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemOrigin;

    fn item(url: &str, providers: &[&str], base: f64) -> MergedItem {
        MergedItem {
            url: url.into(),
            title: "t".into(),
            snippet: String::new(),
            raw_content: None,
            published_at: None,
            providers: providers.iter().map(|p| (*p).to_owned()).collect(),
            alternate_urls: vec![],
            base_score: base,
            score: 0.0,
            dedup: None,
            origin: ItemOrigin::default(),
        }
    }

    #[test]
    fn position_decay_matches_formula() {
        assert!((position_decay(0) - 1.0).abs() < f64::EPSILON);
        assert!((position_decay(5) - 1.0 / 1.5).abs() < f64::EPSILON);
        assert!((base_score(1.2, 0) - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn boost_grows_then_caps() {
        let config = MergerConfig::default();
        assert!((cross_provider_boost(1, &config) - 1.0).abs() < f64::EPSILON);
        assert!((cross_provider_boost(2, &config) - 1.2).abs() < 1e-12);
        assert!((cross_provider_boost(10, &config) - 1.6).abs() < f64::EPSILON);
    }

    #[test]
    fn recency_halves_each_half_life() {
        let now = Utc::now();
        assert!((recency(now, now, 24.0) - 1.0).abs() < f64::EPSILON);
        let day_old = now - chrono::Duration::hours(24);
        assert!((recency(day_old, now, 24.0) - 0.5).abs() < 1e-9);
        assert!((recency(now + chrono::Duration::hours(3), now, 24.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn credibility_prefers_domain_override() {
        let mut config = MergerConfig::default();
        config.domain_credibility.insert("nature.com".into(), 0.95);
        let mut weights = BTreeMap::new();
        weights.insert("a".to_owned(), SourceWeight { quality_weight: 1.0, credibility: 0.4 });
        weights.insert("b".to_owned(), SourceWeight { quality_weight: 1.0, credibility: 0.7 });

        let journal = item("https://www.nature.com/x", &["a"], 1.0);
        assert!((credibility(&journal, &weights, &config) - 0.95).abs() < f64::EPSILON);
        let blog = item("https://blog.example/x", &["a", "b"], 1.0);
        assert!((credibility(&blog, &weights, &config) - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn recency_only_for_time_sensitive_queries() {
        let config = MergerConfig::default();
        let weights = BTreeMap::new();
        let now = Utc::now();
        let mut fresh = item("https://a.com", &["x"], 1.0);
        fresh.published_at = Some(now);
        let plain = composite(&fresh, &weights, &config, false, now);
        let timely = composite(&fresh, &weights, &config, true, now);
        assert!((timely - plain - config.recency_weight).abs() < 1e-9);
    }
}
