//! Distributed cache tier: backend contract, in-memory backend, and the
//! availability wrapper the tiered cache talks to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CacheError;
use crate::types::MergedResult;

/// Key/value store shared between engine instances (Redis, memcached, ...).
///
/// Values are opaque bytes. Implementations own TTL enforcement.
#[async_trait]
pub trait DistributedBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Cheap connectivity check, polled only when the tier was marked down.
    async fn probe(&self) -> Result<(), CacheError>;
}

/// Process-local backend. Useful for single-instance deployments and tests.
///
/// Can be switched offline to simulate an outage.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    offline: Mutex<bool>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(PoisonError::into_inner) = offline;
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, (Vec<u8>, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), CacheError> {
        if *self.offline.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(CacheError::Unavailable("backend offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check_online()?;
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.check_online()?;
        self.entries().insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check_online()?;
        self.entries().remove(key);
        Ok(())
    }

    async fn probe(&self) -> Result<(), CacheError> {
        self.check_online()
    }
}

/// Envelope stored in the distributed tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: MergedResult,
    pub inserted_at: DateTime<Utc>,
    #[serde(with = "crate::types::duration_ms")]
    pub ttl: Duration,
    /// Providers the entry was indexed under.
    #[serde(default)]
    pub providers: Vec<String>,
}

impl CacheEntry {
    /// Time left before this entry goes stale, zero once it has.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let age = (now - self.inserted_at).to_std().unwrap_or(Duration::ZERO);
        self.ttl.saturating_sub(age)
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|e| CacheError::Codec(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Codec(e.to_string()))
    }
}

/// Wraps a backend with per-call timeouts and lazy reconnection.
///
/// After any failure the tier is skipped until `probe_interval` has
/// passed; the next use then probes the backend before trusting it again.
pub(crate) struct DistributedTier {
    backend: Arc<dyn DistributedBackend>,
    timeout: Duration,
    probe_interval: Duration,
    down_since: Mutex<Option<Instant>>,
}

impl DistributedTier {
    pub(crate) fn new(backend: Arc<dyn DistributedBackend>, timeout: Duration, probe_interval: Duration) -> Self {
        Self {
            backend,
            timeout,
            probe_interval,
            down_since: Mutex::new(None),
        }
    }

    fn down_since(&self) -> MutexGuard<'_, Option<Instant>> {
        self.down_since.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_available(&self) -> bool {
        self.down_since().is_none()
    }

    fn mark_down(&self, err: &CacheError) {
        let mut down = self.down_since();
        if down.is_none() {
            tracing::warn!(error = %err, "distributed cache unavailable, serving from memory tier only");
        }
        *down = Some(Instant::now());
    }

    async fn ensure_available(&self) -> Result<(), CacheError> {
        let down = *self.down_since();
        let Some(since) = down else {
            return Ok(());
        };
        if since.elapsed() < self.probe_interval {
            return Err(CacheError::Unavailable("awaiting probe interval".into()));
        }
        match tokio::time::timeout(self.timeout, self.backend.probe()).await {
            Ok(Ok(())) => {
                *self.down_since() = None;
                tracing::info!("distributed cache reachable again");
                Ok(())
            }
            Ok(Err(err)) => {
                self.mark_down(&err);
                Err(err)
            }
            Err(_) => {
                self.mark_down(&CacheError::Timeout);
                Err(CacheError::Timeout)
            }
        }
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        self.ensure_available().await?;
        let result = match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        };
        if let Err(err) = &result {
            if !matches!(err, CacheError::Codec(_)) {
                self.mark_down(err);
            }
        }
        result
    }

    pub(crate) async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.bounded(self.backend.get(key)).await
    }

    pub(crate) async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.bounded(self.backend.set(key, value, ttl)).await
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.bounded(self.backend.delete(key)).await
    }
}
