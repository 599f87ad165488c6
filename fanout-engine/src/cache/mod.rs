//! Two-tier result cache keyed by query [`Fingerprint`].
//!
//! Lookups check the in-process tier first, then the distributed tier; a
//! distributed hit is promoted into memory with its remaining TTL. Writes
//! go to both tiers, the memory copy capped at the shorter memory TTL.
//!
//! The distributed tier is an optimisation only. Every failure there is
//! logged and swallowed, and the cache keeps answering from memory.

mod distributed;
mod memory;

pub use distributed::{CacheEntry, DistributedBackend, InMemoryBackend};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::fingerprint::Fingerprint;
use crate::types::{CacheTier, MergedResult};

use distributed::DistributedTier;
use memory::{MemoryEntry, MemoryTier};

const ENTRY_PREFIX: &str = "fanout:entry:";
const PROVIDER_INDEX_PREFIX: &str = "fanout:provider:";
const ALL_INDEX_KEY: &str = "fanout:index";

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(Fingerprint),
    /// Every entry naming this provider.
    Provider(String),
    All,
}

pub struct TieredCache {
    config: CacheConfig,
    memory: MemoryTier,
    distributed: Option<DistributedTier>,
}

impl TieredCache {
    /// Memory tier only.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            distributed: None,
            config,
        }
    }

    pub fn with_distributed(config: CacheConfig, backend: Arc<dyn DistributedBackend>) -> Self {
        let tier = DistributedTier::new(backend, config.distributed_timeout(), config.probe_interval());
        Self {
            memory: MemoryTier::new(config.memory_capacity),
            distributed: Some(tier),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// `None` when no distributed tier is configured.
    pub fn distributed_available(&self) -> Option<bool> {
        self.distributed.as_ref().map(DistributedTier::is_available)
    }

    /// Look up a merged result. The returned value has `served_from` set.
    pub async fn get(&self, key: &Fingerprint) -> Option<MergedResult> {
        if !self.config.enabled {
            return None;
        }
        if let Some(entry) = self.memory.get(key).await {
            let mut result = (*entry.result).clone();
            result.served_from = Some(CacheTier::Memory);
            return Some(result);
        }

        let tier = self.distributed.as_ref()?;
        let entry = match self.fetch_distributed(tier, key).await {
            Ok(entry) => entry?,
            Err(err) => {
                tracing::debug!(error = %err, "distributed cache lookup failed, treating as miss");
                return None;
            }
        };
        let remaining = entry.remaining(Utc::now());
        if remaining.is_zero() {
            return None;
        }

        let mut result = entry.result;
        result.served_from = None;
        self.memory
            .insert(
                *key,
                MemoryEntry {
                    result: Arc::new(result.clone()),
                    ttl: remaining.min(self.config.memory_ttl()),
                    providers: entry.providers.into(),
                },
            )
            .await;
        result.served_from = Some(CacheTier::Distributed);
        Some(result)
    }

    async fn fetch_distributed(
        &self,
        tier: &DistributedTier,
        key: &Fingerprint,
    ) -> Result<Option<CacheEntry>, CacheError> {
        match tier.get(&entry_key(key)).await? {
            Some(bytes) => CacheEntry::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Store a merged result under `key` for `ttl` in the distributed tier
    /// and `min(ttl, memory_ttl)` in memory.
    ///
    /// The entry is indexed under every provider in the result's reports.
    pub async fn put(&self, key: Fingerprint, result: &MergedResult, ttl: Duration) {
        if !self.config.enabled || ttl.is_zero() {
            return;
        }
        let providers: Vec<String> = result
            .providers
            .iter()
            .map(|r| r.provider.clone())
            .chain(result.contributing_providers().into_iter().map(str::to_owned))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut stored = result.clone();
        stored.served_from = None;

        self.memory
            .insert(
                key,
                MemoryEntry {
                    result: Arc::new(stored.clone()),
                    ttl: ttl.min(self.config.memory_ttl()),
                    providers: providers.clone().into(),
                },
            )
            .await;

        if let Some(tier) = &self.distributed {
            if let Err(err) = self.store_distributed(tier, key, stored, ttl, providers).await {
                tracing::debug!(error = %err, "distributed cache write skipped");
            }
        }
    }

    async fn store_distributed(
        &self,
        tier: &DistributedTier,
        key: Fingerprint,
        result: MergedResult,
        ttl: Duration,
        providers: Vec<String>,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            result,
            inserted_at: Utc::now(),
            ttl,
            providers,
        };
        tier.set(&entry_key(&key), entry.encode()?, ttl).await?;

        let index_ttl = self.config.distributed_ttl().max(ttl);
        let hex = key.to_hex();
        for provider in &entry.providers {
            add_to_index(tier, &provider_index_key(provider), &hex, index_ttl).await?;
        }
        add_to_index(tier, ALL_INDEX_KEY, &hex, index_ttl).await
    }

    pub async fn invalidate(&self, what: Invalidation) {
        match &what {
            Invalidation::Key(key) => self.memory.remove(key).await,
            Invalidation::Provider(provider) => {
                let removed = self.memory.remove_provider(provider).await;
                tracing::debug!(provider = %provider, entries = removed.len(), "memory cache invalidated for provider");
            }
            Invalidation::All => self.memory.clear().await,
        }

        if let Some(tier) = &self.distributed {
            if let Err(err) = invalidate_distributed(tier, &what).await {
                tracing::warn!(error = %err, "distributed cache invalidation incomplete");
            }
        }
    }
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("config", &self.config)
            .field("distributed", &self.distributed_available())
            .finish_non_exhaustive()
    }
}

fn entry_key(key: &Fingerprint) -> String {
    format!("{ENTRY_PREFIX}{key}")
}

fn provider_index_key(provider: &str) -> String {
    format!("{PROVIDER_INDEX_PREFIX}{provider}")
}

async fn read_index(tier: &DistributedTier, index_key: &str) -> Result<BTreeSet<String>, CacheError> {
    match tier.get(index_key).await? {
        Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| CacheError::Codec(e.to_string())),
        None => Ok(BTreeSet::new()),
    }
}

// Read-modify-write; concurrent writers may lose an index entry, which only
// makes a later invalidation miss that entry until its TTL runs out.
async fn add_to_index(tier: &DistributedTier, index_key: &str, hex: &str, ttl: Duration) -> Result<(), CacheError> {
    let mut keys = read_index(tier, index_key).await?;
    if keys.insert(hex.to_owned()) {
        let bytes = serde_json::to_vec(&keys).map_err(|e| CacheError::Codec(e.to_string()))?;
        tier.set(index_key, bytes, ttl).await?;
    }
    Ok(())
}

async fn invalidate_distributed(tier: &DistributedTier, what: &Invalidation) -> Result<(), CacheError> {
    match what {
        Invalidation::Key(key) => tier.delete(&entry_key(key)).await,
        Invalidation::Provider(provider) => {
            let index_key = provider_index_key(provider);
            for hex in read_index(tier, &index_key).await? {
                tier.delete(&format!("{ENTRY_PREFIX}{hex}")).await?;
            }
            tier.delete(&index_key).await
        }
        Invalidation::All => {
            for hex in read_index(tier, ALL_INDEX_KEY).await? {
                tier.delete(&format!("{ENTRY_PREFIX}{hex}")).await?;
            }
            tier.delete(ALL_INDEX_KEY).await
        }
    }
}
