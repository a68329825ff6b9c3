use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use rewind_config::{ResumeTargetConfig, DEFAULT_MAX_RESUME_TARGETS};
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::epoch::{Epoch, EpochToken};

/// Configuration for an [`EpochCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether to cache at all. A disabled cache fetches every time.
    pub enabled: bool,
    /// Maximum number of entries in the cache.
    pub max_entries: u64,
    /// Time-to-live for cache entries.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: DEFAULT_MAX_RESUME_TARGETS,
            ttl: None,
        }
    }
}

impl From<&ResumeTargetConfig> for CacheConfig {
    fn from(config: &ResumeTargetConfig) -> Self {
        CacheConfig {
            enabled: config.enabled,
            max_entries: config.max_entries.unwrap_or(DEFAULT_MAX_RESUME_TARGETS),
            ttl: config.ttl.as_ref().map(|ttl| ttl.as_duration()),
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Fetches that completed after the epoch moved and were not kept.
    pub stale_discards: u64,
    /// Number of invalidating operations started.
    pub invalidations: u64,
    /// Approximate number of live entries.
    pub entries: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct StatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_discards: AtomicU64,
    invalidations: AtomicU64,
}

impl StatsTracker {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_stats(&self, entries: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Cache whose entries are only valid for the epoch they were written in.
///
/// Keys are stored as `(epoch, key)`. [`invalidate`](Self::invalidate)
/// advances the epoch and clears everything; a fetch that was in flight when
/// the epoch moved still answers its caller but leaves nothing behind.
/// Identical concurrent misses share one fetch.
pub struct EpochCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    config: CacheConfig,
    cache: Cache<(EpochToken, K), V>,
    epoch: Epoch,
    stats: StatsTracker,
    pending: watch::Sender<usize>,
}

impl<K, V> EpochCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_entries);
        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }
        let (pending, _) = watch::channel(0);
        EpochCache {
            config,
            cache: builder.build(),
            epoch: Epoch::new(),
            stats: StatsTracker::default(),
            pending,
        }
    }

    pub fn epoch(&self) -> EpochToken {
        self.epoch.current()
    }

    /// Return the cached value for `key`, or run `fetch` and cache its result
    /// if the epoch has not moved in the meantime.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: Clone + Send + Sync + 'static,
    {
        if !self.config.enabled {
            trace!(?key, "cache disabled, fetching");
            StatsTracker::bump(&self.stats.misses);
            return fetch().await;
        }

        let token = self.epoch.current();
        let entry_key = (token, key);
        if let Some(value) = self.cache.get(&entry_key).await {
            StatsTracker::bump(&self.stats.hits);
            trace!(key = ?entry_key.1, epoch = token.value(), "cache hit");
            return Ok(value);
        }

        StatsTracker::bump(&self.stats.misses);
        trace!(key = ?entry_key.1, epoch = token.value(), "cache miss");
        let value = self
            .cache
            .try_get_with(entry_key.clone(), fetch())
            .await
            .map_err(|err| (*err).clone())?;

        if !self.epoch.is_current(token) {
            self.cache.invalidate(&entry_key).await;
            StatsTracker::bump(&self.stats.stale_discards);
            debug!(key = ?entry_key.1, epoch = token.value(), "discarding stale cache entry");
        }
        Ok(value)
    }

    /// Run `op`, an operation that changes what fetched values would be.
    ///
    /// The epoch advances and the cache is cleared before `op` starts. The
    /// operation counts as pending until it finishes or is dropped.
    pub async fn invalidate<Fut, T>(&self, op: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let token = self.epoch.advance();
        self.cache.invalidate_all();
        StatsTracker::bump(&self.stats.invalidations);
        self.pending.send_modify(|n| *n += 1);
        debug!(epoch = token.value(), "cache invalidated");

        let _guard = PendingGuard {
            pending: &self.pending,
        };
        op.await
    }

    /// Number of invalidating operations still running.
    pub fn pending_invalidations(&self) -> usize {
        *self.pending.borrow()
    }

    /// Wait until no invalidating operation is running.
    pub async fn wait_for_pending_invalidations(&self) {
        let mut rx = self.pending.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats(self.cache.entry_count())
    }

    /// Flush moka's internal bookkeeping so `stats().entries` is exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

struct PendingGuard<'a> {
    pending: &'a watch::Sender<usize>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Shared handle to an epoch cache.
pub type SharedEpochCache<K, V> = Arc<EpochCache<K, V>>;
