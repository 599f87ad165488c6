//! Stable cache keys for queries.
//!
//! A [`Fingerprint`] is a blake3 hash over the cache-relevant fields of a
//! [`Query`]. Each field is written with a tag and a length prefix, so no
//! two distinct field layouts can produce the same byte stream.
//!
//! Request id and deadline do not change what the providers would return
//! and are left out. Quality priority is kept: it changes strategy
//! selection and candidate scoring.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Query;

/// 32-byte blake3 digest identifying a query for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(query: &Query) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"fanout/fingerprint/v1");

        field(&mut hasher, b'T', query.normalized_text().as_bytes());
        field(
            &mut hasher,
            b'C',
            query.content_type().map_or("", |ct| ct.name()).as_bytes(),
        );
        field(&mut hasher, b'R', &[u8::from(query.include_raw_content())]);

        let hints = query.hints();
        match &hints.providers {
            // BTreeSet iterates in sorted order.
            Some(providers) => {
                field(&mut hasher, b'P', &(providers.len() as u64).to_le_bytes());
                for provider in providers {
                    field(&mut hasher, b'p', provider.as_bytes());
                }
            }
            None => field(&mut hasher, b'P', b"*"),
        }
        field(
            &mut hasher,
            b'S',
            hints.strategy.map_or("", |s| s.name()).as_bytes(),
        );
        field(&mut hasher, b'M', &(query.max_results() as u64).to_le_bytes());
        let time_flag = match query.time_sensitive_flag() {
            None => 0u8,
            Some(false) => 1,
            Some(true) => 2,
        };
        field(&mut hasher, b'F', &[time_flag]);
        field(&mut hasher, b'Q', &[u8::from(hints.prioritize_quality)]);

        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, 64 characters.
    pub fn to_hex(&self) -> String {
        self.to_string()
    }

    /// Parse the 64-character hex form.
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

fn field(hasher: &mut blake3::Hasher, tag: u8, value: &[u8]) {
    hasher.update(&[tag]);
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value);
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentType, StrategyKind};
    use std::collections::HashSet;
    use std::time::Duration;

    #[test]
    fn request_metadata_does_not_change_fingerprint() {
        let a = Query::new("rust async runtimes").with_request_id("req-1");
        let b = Query::new("  Rust  Async Runtimes")
            .with_request_id("req-2")
            .with_deadline(Duration::from_millis(900));
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn provider_order_is_irrelevant() {
        let a = Query::new("q").with_providers(["exa", "brave"]);
        let b = Query::new("q").with_providers(["brave", "exa"]);
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn cache_relevant_fields_change_fingerprint() {
        let base = Query::new("quantum computing");
        let variants = [
            base.clone().with_content_type(ContentType::Academic),
            base.clone().with_raw_content(true),
            base.clone().with_providers(["exa"]),
            base.clone().with_strategy(StrategyKind::Cascade),
            base.clone().with_max_results(25),
            base.clone().time_sensitive(true),
            base.clone().time_sensitive(false),
            base.clone().prioritize_quality(),
        ];
        let mut seen = HashSet::new();
        seen.insert(Fingerprint::of(&base));
        for variant in &variants {
            assert!(seen.insert(Fingerprint::of(variant)), "collision for {variant:?}");
        }
    }

    #[test]
    fn allow_list_boundaries_do_not_collide() {
        let a = Query::new("q").with_providers(["ab", "c"]);
        let b = Query::new("q").with_providers(["a", "bc"]);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn no_collisions_in_generated_corpus() {
        let mut seen = HashSet::new();
        for i in 0..2_000 {
            let query = Query::new(&format!("query number {i} about topic {}", i % 37));
            assert!(seen.insert(Fingerprint::of(&query)));
        }
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint::of(&Query::new("hello world"));
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
        assert_eq!(Fingerprint::from_hex("zz"), None);
    }
}
