//! String and snippet similarity measures used by the fuzzy and content
//! dedup stages.

use std::collections::HashMap;

use similar::TextDiff;

/// Character-level similarity ratio in `[0, 1]`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    f64::from(TextDiff::from_chars(a, b).ratio())
}

/// Title similarity, ignoring case and surrounding whitespace.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    text_similarity(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

/// Term-frequency vector of lowercase alphanumeric words.
#[derive(Debug, Clone, Default)]
pub struct TermVector {
    counts: HashMap<String, f64>,
    terms: usize,
}

impl TermVector {
    pub fn new(text: &str) -> Self {
        let mut counts = HashMap::new();
        let mut terms = 0;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
            terms += 1;
        }
        Self { counts, terms }
    }

    pub fn terms(&self) -> usize {
        self.terms
    }

    fn norm(&self) -> f64 {
        self.counts.values().map(|c| c * c).sum::<f64>().sqrt()
    }

    /// Cosine similarity in `[0, 1]`; zero when either side is empty.
    pub fn cosine(&self, other: &Self) -> f64 {
        let denom = self.norm() * other.norm();
        if denom == 0.0 {
            return 0.0;
        }
        let (small, large) = if self.counts.len() <= other.counts.len() {
            (self, other)
        } else {
            (other, self)
        };
        let dot: f64 = small
            .counts
            .iter()
            .filter_map(|(term, a)| large.counts.get(term).map(|b| a * b))
            .sum();
        (dot / denom).clamp(0.0, 1.0)
    }
}
