//! In-process cache tier backed by [`moka`].
//!
//! Every entry carries its own TTL. A side index maps provider ids to the
//! fingerprints whose entries name them; moka's eviction listener keeps it
//! in step with expiry and capacity eviction.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::notification::RemovalCause;
use moka::Expiry;

use crate::fingerprint::Fingerprint;
use crate::types::MergedResult;

#[derive(Debug, Clone)]
pub(crate) struct MemoryEntry {
    pub result: Arc<MergedResult>,
    pub ttl: Duration,
    pub providers: Arc<[String]>,
}

struct EntryExpiry;

impl Expiry<Fingerprint, MemoryEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &Fingerprint, value: &MemoryEntry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &MemoryEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

type ProviderIndex = HashMap<String, HashSet<Fingerprint>>;

pub(crate) struct MemoryTier {
    cache: Cache<Fingerprint, MemoryEntry>,
    index: Arc<Mutex<ProviderIndex>>,
}

fn lock(index: &Mutex<ProviderIndex>) -> MutexGuard<'_, ProviderIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTier {
    pub(crate) fn new(capacity: u64) -> Self {
        let index: Arc<Mutex<ProviderIndex>> = Arc::default();
        let listener_index = Arc::clone(&index);
        let cache = Cache::builder()
            .max_capacity(capacity)
            .expire_after(EntryExpiry)
            .eviction_listener(move |key: Arc<Fingerprint>, value: MemoryEntry, cause| {
                // A replacement re-indexes under the new value.
                if cause == RemovalCause::Replaced {
                    return;
                }
                let mut index = lock(&listener_index);
                for provider in value.providers.iter() {
                    if let Some(keys) = index.get_mut(provider) {
                        keys.remove(&*key);
                        if keys.is_empty() {
                            index.remove(provider);
                        }
                    }
                }
            })
            .build();
        Self { cache, index }
    }

    pub(crate) async fn get(&self, key: &Fingerprint) -> Option<MemoryEntry> {
        self.cache.get(key).await
    }

    pub(crate) async fn insert(&self, key: Fingerprint, entry: MemoryEntry) {
        let previous = self.cache.get(&key).await;
        {
            let mut index = lock(&self.index);
            // Unlink providers the replacement no longer names.
            if let Some(previous) = previous {
                for provider in previous.providers.iter() {
                    if entry.providers.contains(provider) {
                        continue;
                    }
                    if let Some(keys) = index.get_mut(provider) {
                        keys.remove(&key);
                        if keys.is_empty() {
                            index.remove(provider);
                        }
                    }
                }
            }
            for provider in entry.providers.iter() {
                index.entry(provider.clone()).or_default().insert(key);
            }
        }
        self.cache.insert(key, entry).await;
    }

    pub(crate) async fn remove(&self, key: &Fingerprint) {
        self.cache.invalidate(key).await;
    }

    /// Drop every entry naming `provider`; returns the affected keys.
    pub(crate) async fn remove_provider(&self, provider: &str) -> Vec<Fingerprint> {
        let keys: Vec<Fingerprint> = lock(&self.index)
            .remove(provider)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        for key in &keys {
            self.cache.invalidate(key).await;
        }
        keys
    }

    pub(crate) async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        lock(&self.index).clear();
    }

    #[cfg(test)]
    pub(crate) fn indexed(&self, provider: &str) -> usize {
        lock(&self.index).get(provider).map_or(0, HashSet::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Query, StrategyKind};

    fn entry(ttl: Duration, providers: &[&str]) -> MemoryEntry {
        MemoryEntry {
            result: Arc::new(MergedResult {
                items: vec![],
                strategy: StrategyKind::Parallel,
                providers: vec![],
                partial: false,
                generated_at: chrono::Utc::now(),
                served_from: None,
            }),
            ttl,
            providers: providers.iter().map(|p| (*p).to_owned()).collect(),
        }
    }

    #[tokio::test]
    async fn per_entry_ttl_expires() {
        let tier = MemoryTier::new(16);
        let short = Fingerprint::of(&Query::new("short"));
        let long = Fingerprint::of(&Query::new("long"));
        tier.insert(short, entry(Duration::from_millis(40), &["exa"])).await;
        tier.insert(long, entry(Duration::from_secs(60), &["exa"])).await;

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(tier.get(&short).await.is_none());
        assert!(tier.get(&long).await.is_some());
    }

    #[tokio::test]
    async fn provider_invalidation_uses_index() {
        let tier = MemoryTier::new(16);
        let a = Fingerprint::of(&Query::new("a"));
        let b = Fingerprint::of(&Query::new("b"));
        tier.insert(a, entry(Duration::from_secs(60), &["exa", "brave"])).await;
        tier.insert(b, entry(Duration::from_secs(60), &["brave"])).await;
        assert_eq!(tier.indexed("brave"), 2);

        let removed = tier.remove_provider("exa").await;
        assert_eq!(removed, vec![a]);
        assert!(tier.get(&a).await.is_none());
        assert!(tier.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn replacement_unlinks_providers_it_no_longer_names() {
        let tier = MemoryTier::new(16);
        let key = Fingerprint::of(&Query::new("k"));
        tier.insert(key, entry(Duration::from_secs(60), &["exa"])).await;
        tier.insert(key, entry(Duration::from_secs(60), &["brave"])).await;
        assert_eq!(tier.indexed("exa"), 0);
        assert_eq!(tier.indexed("brave"), 1);

        let removed = tier.remove_provider("exa").await;
        assert!(removed.is_empty());
        let cached = tier.get(&key).await.expect("replacement still cached");
        assert_eq!(&*cached.providers, ["brave".to_owned()]);
    }
}
