//! Per-key load coordination.
//!
//! [`StampedeGuard`] sits in front of a [`LocalCache`] and guarantees that for
//! any number of concurrent misses on one key, at most one loader reaches the
//! backing store:
//!
//! ```text
//! get(key) ── Positive ──────────────────────────────► value
//!     │    ── Negative ──────────────────────────────► not found
//!     └─ Absent
//!          → wait for per-key lock (bounded by deadline) ── timeout ─► ColdStartTimeout
//!          → re-check cache ── Positive / Negative ──────────────────► joined result
//!          → run loader (bounded by the same deadline) ── timeout ───► ColdStartTimeout
//!          → Found / Missing written back unless an eviction raced the load
//! ```
//!
//! Loader errors are returned to the caller and never cached. Locks are
//! created on demand and removed from the table once no caller holds or waits
//! on them, so the table only ever holds keys with a load in flight.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::Arc,
    time::Duration,
};

use paygate_storage::CacheKey;
use parking_lot::Mutex;
use tokio::{
    sync::{Mutex as AsyncMutex, OwnedMutexGuard},
    time::{Instant, timeout_at},
};

use crate::{
    config::TtlPolicy,
    error::{ResolveError, Result},
    local_cache::{CacheEntry, LocalCache},
    metrics::CacheMetrics,
};

/// Outcome of a loader run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loaded<V> {
    /// The backing store returned a value, cached under the given policy.
    Found(V, TtlPolicy),
    /// The backing store confirmed the key does not exist.
    Missing,
}

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// A caller's claim on a per-key lock, held while waiting and while loading.
///
/// On drop the table entry is removed if nobody else references the lock.
struct LockTicket {
    key: String,
    lock: Arc<AsyncMutex<()>>,
    table: LockTable,
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        // Two references left means the table's and ours.
        if let Some(entry) = table.get(&self.key)
            && Arc::ptr_eq(entry, &self.lock)
            && Arc::strong_count(&self.lock) == 2
        {
            table.remove(&self.key);
        }
    }
}

/// A held per-key lock. Field order matters: the guard is released before
/// the ticket prunes the table.
struct LockLease {
    _guard: OwnedMutexGuard<()>,
    _ticket: LockTicket,
}

/// Single-flight loader in front of a [`LocalCache`].
pub struct StampedeGuard<V> {
    cache: Arc<LocalCache<V>>,
    locks: LockTable,
    negative_ttl: Duration,
    metrics: Arc<CacheMetrics>,
}

impl<V> StampedeGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a guard over `cache`. Confirmed-missing keys are cached for
    /// `negative_ttl`.
    #[must_use]
    pub fn new(cache: Arc<LocalCache<V>>, negative_ttl: Duration, metrics: Arc<CacheMetrics>) -> Self {
        Self { cache, locks: Arc::new(Mutex::new(HashMap::new())), negative_ttl, metrics }
    }

    /// Returns the cache this guard fills.
    #[must_use]
    pub fn cache(&self) -> &Arc<LocalCache<V>> {
        &self.cache
    }

    /// Returns this guard's counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Number of keys with a lock currently held or awaited.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.lock().len()
    }

    /// Resolves `key` from cache, or runs `loader` under the key's lock.
    ///
    /// Returns `Ok(Some(value))` for a positive result and `Ok(None)` for a
    /// confirmed absence. `timeout` bounds the lock wait and the load
    /// together.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::ColdStartTimeout`] if the lock or the load does not complete in time
    /// - any error returned by `loader`, uncached
    #[tracing::instrument(
        level = "debug",
        skip(self, loader),
        fields(cache = self.cache.name(), key = %key)
    )]
    pub async fn with_exclusive_load<F, Fut>(
        &self,
        key: &CacheKey,
        timeout: Duration,
        loader: F,
    ) -> Result<Option<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Loaded<V>>>,
    {
        match self.cache.get(key).await {
            CacheEntry::Positive(value) => {
                self.metrics.record_hit();
                tracing::debug!("cache hit");
                return Ok(Some(value));
            },
            CacheEntry::Negative => {
                self.metrics.record_negative_hit();
                tracing::debug!("negative cache hit");
                return Ok(None);
            },
            CacheEntry::Absent => {
                self.metrics.record_miss();
                tracing::debug!("cache miss");
            },
        }

        let deadline = Instant::now() + timeout;
        let Ok(_lease) = timeout_at(deadline, self.acquire(key)).await else {
            self.metrics.record_cold_start_timeout();
            tracing::warn!(?timeout, "timed out waiting for in-flight load");
            return Err(ResolveError::ColdStartTimeout);
        };

        // Another caller may have finished the load while we waited.
        match self.cache.get(key).await {
            CacheEntry::Positive(value) => {
                tracing::debug!("joined in-flight load");
                return Ok(Some(value));
            },
            CacheEntry::Negative => return Ok(None),
            CacheEntry::Absent => {},
        }

        let ticket = self.cache.begin_load(key);
        self.metrics.record_load();
        let loaded = match timeout_at(deadline, loader()).await {
            Ok(Ok(loaded)) => loaded,
            Ok(Err(err)) => {
                self.metrics.record_load_error();
                tracing::debug!(error = %err, "load failed, not cached");
                return Err(err);
            },
            Err(_) => {
                self.metrics.record_cold_start_timeout();
                tracing::warn!(?timeout, "backing store load timed out");
                return Err(ResolveError::ColdStartTimeout);
            },
        };

        let (entry, ttl, result) = match loaded {
            Loaded::Found(value, ttl) => (CacheEntry::Positive(value.clone()), ttl, Some(value)),
            Loaded::Missing => (CacheEntry::Negative, TtlPolicy::default(), None),
        };
        let stored =
            self.cache.put_if_current(key, entry, ttl, self.negative_ttl, &ticket).await;
        if !stored {
            self.metrics.record_discarded_load();
            tracing::debug!("discarding load result: key evicted during fetch");
        }
        Ok(result)
    }

    async fn acquire(&self, key: &CacheKey) -> LockLease {
        let lock = Arc::clone(self.locks.lock().entry(key.as_str().to_owned()).or_default());
        let ticket =
            LockTicket { key: key.as_str().to_owned(), lock, table: Arc::clone(&self.locks) };
        let guard = Arc::clone(&ticket.lock).lock_owned().await;
        LockLease { _guard: guard, _ticket: ticket }
    }
}

impl<V> fmt::Debug for StampedeGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StampedeGuard")
            .field("cache", &self.cache.name())
            .field("in_flight", &self.locks.lock().len())
            .field("negative_ttl", &self.negative_ttl)
            .finish()
    }
}
