use std::sync::Arc;
use std::time::{Duration, Instant};

use tiller_runtime::AvailableModelsSource;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::Result;
use crate::types::CacheInfo;

struct CacheEntry {
    items: Vec<String>,
    fetched_at: Instant,
    fetched_wall: chrono::DateTime<chrono::Utc>,
    generation: u64,
}

/// Process-local cache of the installable-model names.
///
/// Reads serve the cached set while it is younger than the TTL; stale reads
/// and forced refreshes go to the source. Refreshes are single-flight:
/// concurrent callers queue on one latch, and whoever finds a newer
/// generation after acquiring it reuses that outcome instead of fetching
/// again.
pub struct AvailableModelsCache {
    source: Arc<dyn AvailableModelsSource>,
    ttl: Duration,
    inner: RwLock<Option<CacheEntry>>,
    refresh_latch: Mutex<()>,
}

impl AvailableModelsCache {
    pub fn new(source: Arc<dyn AvailableModelsSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            inner: RwLock::new(None),
            refresh_latch: Mutex::new(()),
        }
    }

    /// Cached names, refreshing first when stale or when `force` is set.
    pub async fn get(&self, force: bool) -> Result<Vec<String>> {
        if !force {
            if let Some(items) = self.fresh_items().await {
                return Ok(items);
            }
        }
        self.refresh().await
    }

    async fn fresh_items(&self) -> Option<Vec<String>> {
        let guard = self.inner.read().await;
        guard
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.items.clone())
    }

    /// Fetch from the source and replace the cached set atomically.
    async fn refresh(&self) -> Result<Vec<String>> {
        let seen_generation = {
            let guard = self.inner.read().await;
            guard.as_ref().map(|e| e.generation)
        };

        let _latch = self.refresh_latch.lock().await;

        // Someone else completed a refresh while we waited; share it.
        {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.as_ref() {
                if Some(entry.generation) != seen_generation {
                    debug!("sharing concurrent refresh outcome");
                    return Ok(entry.items.clone());
                }
            }
        }

        let names = self.source.fetch().await?;
        let mut items: Vec<String> = names.into_iter().collect();
        items.sort();

        let mut guard = self.inner.write().await;
        let generation = guard.as_ref().map(|e| e.generation + 1).unwrap_or(1);
        *guard = Some(CacheEntry {
            items: items.clone(),
            fetched_at: Instant::now(),
            fetched_wall: chrono::Utc::now(),
            generation,
        });
        info!(count = items.len(), "installable models cache refreshed");
        Ok(items)
    }

    pub async fn info(&self) -> CacheInfo {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some(entry) => {
                let age = entry.fetched_at.elapsed();
                let remaining = self.ttl.checked_sub(age);
                CacheInfo {
                    cached_models_count: entry.items.len(),
                    last_updated: Some(entry.fetched_wall.to_rfc3339()),
                    ttl_hours: self.ttl.as_secs() / 3600,
                    is_expired: remaining.is_none(),
                    time_until_expiry_ns: remaining.map(|d| d.as_nanos() as i64).unwrap_or(0),
                }
            }
            None => CacheInfo {
                cached_models_count: 0,
                last_updated: None,
                ttl_hours: self.ttl.as_secs() / 3600,
                is_expired: true,
                time_until_expiry_ns: 0,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AvailableModelsSource for CountingSource {
        async fn fetch(&self) -> tiller_runtime::error::Result<HashSet<String>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HashSet::from([format!("model-{n}"), "llama3.2".to_string()]))
        }
    }

    #[tokio::test]
    async fn fresh_reads_do_not_hit_the_source() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = AvailableModelsCache::new(source.clone(), Duration::from_secs(3600));

        let first = cache.get(false).await.unwrap();
        let second = cache.get(false).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_refresh_replaces_the_set() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = AvailableModelsCache::new(source.clone(), Duration::from_secs(3600));

        let first = cache.get(false).await.unwrap();
        let second = cache.get(true).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = AvailableModelsCache::new(source.clone(), Duration::ZERO);

        cache.get(false).await.unwrap();
        cache.get(false).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert!(cache.info().await.is_expired);
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_flight() {
        struct SlowSource {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl AvailableModelsSource for SlowSource {
            async fn fetch(&self) -> tiller_runtime::error::Result<HashSet<String>> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(HashSet::from(["llama3.2".to_string()]))
            }
        }

        let source = Arc::new(SlowSource {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AvailableModelsCache::new(
            source.clone(),
            Duration::from_secs(3600),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(true).await.unwrap() }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // The stampede collapses into one fetch (a second is tolerated for
        // the racer that started before the first generation existed).
        assert!(source.calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cache_info_reports_counts_and_expiry() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let cache = AvailableModelsCache::new(source, Duration::from_secs(7200));

        let empty = cache.info().await;
        assert_eq!(empty.cached_models_count, 0);
        assert!(empty.is_expired);

        cache.get(false).await.unwrap();
        let info = cache.info().await;
        assert_eq!(info.cached_models_count, 2);
        assert_eq!(info.ttl_hours, 2);
        assert!(!info.is_expired);
        assert!(info.time_until_expiry_ns > 0);
    }
}
