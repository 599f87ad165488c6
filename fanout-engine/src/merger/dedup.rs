//! The four dedup stages and the survivor merge rule.
//!
//! Stages run in order (exact URL, normalised URL, fuzzy title/URL,
//! snippet content) and the whole pass repeats until nothing collapses,
//! so the output contains no pair that any stage would still merge.

use std::collections::HashMap;

use crate::config::MergerConfig;
use crate::types::{DedupMethod, MergedItem};

use super::similarity::{text_similarity, title_similarity, TermVector};
use super::url_normalize::{host_of, normalize_url};

/// Collapse duplicates in `items`. Input order is the tie-break order.
pub(crate) fn deduplicate(mut items: Vec<MergedItem>, config: &MergerConfig) -> Vec<MergedItem> {
    loop {
        let before = items.len();
        items = collapse_by_key(items, DedupMethod::ExactUrl, |url| url.to_owned());
        items = collapse_by_key(items, DedupMethod::NormalizedUrl, normalize_url);
        items = collapse_pairwise(items, DedupMethod::Fuzzy, |a, b| is_fuzzy_duplicate(a, b, config));
        items = collapse_content(items, config);
        if items.len() == before {
            return items;
        }
    }
}

/// Stages (a) and (b): every URL an item carries, including alternates,
/// maps to the item that owns it.
fn collapse_by_key(
    items: Vec<MergedItem>,
    method: DedupMethod,
    key_of: impl Fn(&str) -> String,
) -> Vec<MergedItem> {
    let mut survivors: Vec<MergedItem> = Vec::with_capacity(items.len());
    let mut owners: HashMap<String, usize> = HashMap::new();

    for item in items {
        let keys: Vec<String> = std::iter::once(item.url.as_str())
            .chain(item.alternate_urls.iter().map(String::as_str))
            .map(&key_of)
            .collect();
        let owner = keys.iter().find_map(|k| owners.get(k).copied());
        let index = match owner {
            Some(index) => {
                absorb(&mut survivors[index], item, method);
                index
            }
            None => {
                survivors.push(item);
                survivors.len() - 1
            }
        };
        for key in keys {
            owners.entry(key).or_insert(index);
        }
    }
    survivors
}

fn collapse_pairwise(
    items: Vec<MergedItem>,
    method: DedupMethod,
    is_duplicate: impl Fn(&MergedItem, &MergedItem) -> bool,
) -> Vec<MergedItem> {
    let mut survivors: Vec<MergedItem> = Vec::with_capacity(items.len());
    for item in items {
        match survivors.iter().position(|s| is_duplicate(s, &item)) {
            Some(index) => absorb(&mut survivors[index], item, method),
            None => survivors.push(item),
        }
    }
    survivors
}

fn is_fuzzy_duplicate(a: &MergedItem, b: &MergedItem, config: &MergerConfig) -> bool {
    if a.title.trim().is_empty() || b.title.trim().is_empty() {
        return false;
    }
    if title_similarity(&a.title, &b.title) < config.fuzzy_title_threshold {
        return false;
    }
    let same_host = matches!((host_of(&a.url), host_of(&b.url)), (Some(x), Some(y)) if x == y);
    same_host || text_similarity(&normalize_url(&a.url), &normalize_url(&b.url)) >= config.fuzzy_url_threshold
}

/// Stage (d). Term vectors are built once per item.
fn collapse_content(items: Vec<MergedItem>, config: &MergerConfig) -> Vec<MergedItem> {
    let mut survivors: Vec<(MergedItem, TermVector)> = Vec::with_capacity(items.len());
    for item in items {
        let vector = TermVector::new(&item.snippet);
        let eligible = vector.terms() >= config.min_content_terms;
        let owner = eligible
            .then(|| {
                survivors.iter().position(|(_, v)| {
                    v.terms() >= config.min_content_terms && v.cosine(&vector) >= config.content_threshold
                })
            })
            .flatten();
        match owner {
            Some(index) => {
                let (survivor, survivor_vector) = &mut survivors[index];
                let survivor_won = survivor_wins(survivor, &item);
                absorb(survivor, item, DedupMethod::Content);
                if !survivor_won {
                    *survivor_vector = TermVector::new(&survivor.snippet);
                }
            }
            None => survivors.push((item, vector)),
        }
    }
    survivors.into_iter().map(|(item, _)| item).collect()
}

/// Higher provider-weighted score wins; ties go to the earlier origin.
fn survivor_wins(survivor: &MergedItem, challenger: &MergedItem) -> bool {
    challenger.base_score <= survivor.base_score
}

/// Merge `other` into `survivor`, swapping roles first if `other` wins.
///
/// The loser's providers, URL, and missing fields are carried over. The
/// dedup method is recorded only when the merge added something.
fn absorb(survivor: &mut MergedItem, mut other: MergedItem, method: DedupMethod) {
    if !survivor_wins(survivor, &other) {
        std::mem::swap(survivor, &mut other);
    }
    let loser = other;
    let mut added = false;

    for provider in loser.providers {
        if !survivor.providers.contains(&provider) {
            survivor.providers.push(provider);
            added = true;
        }
    }
    for url in std::iter::once(loser.url).chain(loser.alternate_urls) {
        if url != survivor.url && !survivor.alternate_urls.contains(&url) {
            survivor.alternate_urls.push(url);
            added = true;
        }
    }
    if survivor.raw_content.is_none() && loser.raw_content.is_some() {
        survivor.raw_content = loser.raw_content;
        added = true;
    }
    if survivor.published_at.is_none() && loser.published_at.is_some() {
        survivor.published_at = loser.published_at;
        added = true;
    }
    survivor.origin = survivor.origin.min(loser.origin);
    if survivor.dedup.is_none() {
        survivor.dedup = loser.dedup;
    }
    if added && survivor.dedup.is_none() {
        survivor.dedup = Some(method);
    }
}
