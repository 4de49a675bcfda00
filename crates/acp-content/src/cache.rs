//! Bounded cache for version bodies read from disk
//!
//! Keys are `(fingerprint, version)`. Eviction is explicit: entries are
//! dropped when the cache exceeds its capacity (LRU-ish, per moka) or when
//! their time-to-live elapses. Expiry is checked by the cache on access,
//! with moka's maintenance tasks reclaiming space in the background.

use crate::error::ContentError;
use crate::fingerprint::Fingerprint;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Cache key for a version body
pub type BodyKey = (Fingerprint, u32);

/// Cache sizing and expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of bodies held
    pub max_capacity: u64,
    /// Time-to-live for each body
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_capacity: 2_048,
            ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Statistics for cache monitoring
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    /// Number of entries in cache
    pub entry_count: u64,
}

/// Version body cache
#[derive(Debug, Clone)]
pub struct VersionBodyCache {
    inner: Cache<BodyKey, Arc<str>>,
}

impl VersionBodyCache {
    /// Create cache from settings
    #[inline]
    #[must_use]
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(settings.max_capacity)
                .time_to_live(settings.ttl)
                .build(),
        }
    }

    /// Get body if cached and not expired
    #[inline]
    pub async fn get(&self, key: &BodyKey) -> Option<Arc<str>> {
        self.inner.get(key).await
    }

    /// Insert body
    #[inline]
    pub async fn insert(&self, key: BodyKey, body: Arc<str>) {
        self.inner.insert(key, body).await;
    }

    /// Try to get or load body
    pub async fn try_get_or_load<F, Fut>(
        &self,
        key: BodyKey,
        load: F,
    ) -> Result<Arc<str>, ContentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, ContentError>>,
    {
        if let Some(cached) = self.get(&key).await {
            return Ok(cached);
        }

        let body: Arc<str> = load().await?.into();
        self.insert(key, Arc::clone(&body)).await;

        Ok(body)
    }

    /// Invalidate all entries
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Get cache statistics
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.inner.entry_count(),
        }
    }
}

impl Default for VersionBodyCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(n: u32) -> BodyKey {
        (Fingerprint::new([0, 0, 0, 1]), n)
    }

    #[tokio::test]
    async fn loads_once_then_serves_cached() {
        let cache = VersionBodyCache::default();
        let loads = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let loads = Arc::clone(&loads);
            let body = cache
                .try_get_or_load(key(1), || async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok("body".to_string())
                })
                .await
                .unwrap();
            assert_eq!(&*body, "body");
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn load_errors_are_not_cached() {
        let cache = VersionBodyCache::default();

        let failed = cache
            .try_get_or_load(key(2), || async {
                Err(ContentError::io(
                    "missing.md",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
                ))
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.get(&key(2)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_not_served() {
        let cache = VersionBodyCache::new(CacheSettings {
            max_capacity: 10,
            ttl: Duration::from_millis(20),
        });
        cache.insert(key(3), Arc::from("short-lived")).await;
        assert!(cache.get(&key(3)).await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get(&key(3)).await.is_none());
    }
}
