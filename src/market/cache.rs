//! In-process TTL cache for market data responses.
//!
//! Read-through wrapper around the Binance proxy calls. Fallback policy is
//! explicit and lives here, at the collaborator boundary: when the upstream
//! fetch fails and a stale entry exists, the stale entry is served; with no
//! stale entry the error propagates. Accounting correctness never depends on
//! this cache.

use anyhow::Result;
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    future::Future,
    time::{Duration, Instant},
};
use tracing::warn;

struct CacheEntry {
    value: serde_json::Value,
    fetched_at: Instant,
}

#[derive(Default)]
pub struct MarketCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a cached value younger than `ttl`, otherwise run `fetch` and
    /// cache its result. On fetch failure a stale entry is served if present.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (fresh, stale) = self.lookup(key, ttl);
        if let Some(value) = fresh {
            if let Ok(v) = serde_json::from_value::<T>(value) {
                return Ok(v);
            }
        }

        match fetch().await {
            Ok(value) => {
                if let Ok(json) = serde_json::to_value(&value) {
                    self.entries.write().insert(
                        key.to_string(),
                        CacheEntry {
                            value: json,
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Ok(value)
            }
            Err(e) => {
                if let Some(value) = stale {
                    if let Ok(v) = serde_json::from_value::<T>(value) {
                        warn!(key = %key, "market fetch failed - serving stale cache: {}", e);
                        return Ok(v);
                    }
                }
                Err(e)
            }
        }
    }

    /// Snapshot a key as (fresh-within-ttl, any-age) values. Both are clones
    /// so no lock is held across the fetch await point.
    fn lookup(&self, key: &str, ttl: Duration) -> (Option<serde_json::Value>, Option<serde_json::Value>) {
        let entries = self.entries.read();
        match entries.get(key) {
            Some(entry) if entry.fetched_at.elapsed() <= ttl => {
                (Some(entry.value.clone()), Some(entry.value.clone()))
            }
            Some(entry) => (None, Some(entry.value.clone())),
            None => (None, None),
        }
    }

    /// Drop entries older than `max_age` (call from a background task).
    pub fn evict_older_than(&self, max_age: Duration) {
        self.entries
            .write()
            .retain(|_, entry| entry.fetched_at.elapsed() < max_age);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_fresh_hit_skips_fetch() {
        let cache = MarketCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let v: u64 = cache
                .get_or_fetch("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42u64)
                })
                .await
                .unwrap();
            assert_eq!(v, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let cache = MarketCache::new();
        let calls = AtomicUsize::new(0);

        let fetch = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1u64)
        };
        cache
            .get_or_fetch("k", Duration::from_secs(0), fetch)
            .await
            .unwrap();
        cache
            .get_or_fetch("k", Duration::from_secs(0), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(2u64)
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_served_on_fetch_failure() {
        let cache = MarketCache::new();

        cache
            .get_or_fetch("k", Duration::from_secs(0), || async { Ok(7u64) })
            .await
            .unwrap();

        // Entry is now stale (ttl 0); the failing fetch falls back to it.
        let v: u64 = cache
            .get_or_fetch("k", Duration::from_secs(0), || async {
                Err(anyhow::anyhow!("upstream down"))
            })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn test_error_propagates_without_stale() {
        let cache = MarketCache::new();
        let result: Result<u64> = cache
            .get_or_fetch("missing", Duration::from_secs(60), || async {
                Err(anyhow::anyhow!("upstream down"))
            })
            .await;
        assert!(result.is_err());
    }
}
