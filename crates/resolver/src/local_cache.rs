//! In-process cache with sliding and absolute expiration.
//!
//! [`LocalCache`] wraps a [`moka`] future cache with a per-entry expiry policy:
//!
//! - **Positive** entries carry a sliding window and an absolute deadline fixed at write time.
//!   Every read pushes expiry to `min(now + sliding, absolute_deadline)`.
//! - **Negative** entries live for a fixed TTL; reads do not extend them.
//!
//! The cache has no capacity bound. Entries are pinned: only a deadline or an
//! explicit [`evict`](LocalCache::evict) removes them, so an already-cached
//! tenant keeps resolving while the backing store is unreachable.
//!
//! # Scope index
//!
//! Every key belongs to a realm scope (see [`CacheKey::scope`]). The cache
//! keeps `scope -> keys` so [`evict_scope`](LocalCache::evict_scope) touches
//! only the keys it removes. Index entries for keys that expired on their own
//! are left in place until the scope is next evicted; removing a key that is no
//! longer cached is a no-op.
//!
//! # Load tickets
//!
//! A loader calls [`begin_load`](LocalCache::begin_load) before reading the
//! backing store and writes through
//! [`put_if_current`](LocalCache::put_if_current). The cache counts
//! evictions per key while a ticket for that key is outstanding; the write is
//! refused if the key itself (or its scope) was evicted in between. This keeps
//! a value read before a secret rotation from being cached after the
//! rotation's invalidation was applied, while evictions of other keys leave
//! the load alone. Counters exist only for keys with a load in flight.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::{Duration, Instant},
};

use moka::{Expiry, future::Cache};
use paygate_storage::CacheKey;
use parking_lot::Mutex;

use crate::config::TtlPolicy;

/// The state of one key, as seen by a reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry<V> {
    /// Nothing is cached for the key.
    Absent,
    /// The key resolved to a value.
    Positive(V),
    /// The backing store confirmed the key does not exist.
    Negative,
}

impl<V> CacheEntry<V> {
    /// Returns `true` for [`CacheEntry::Absent`].
    #[must_use]
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

#[derive(Clone)]
enum Slot<V> {
    Positive { value: V, sliding: Duration, absolute_deadline: Instant },
    Negative { ttl: Duration },
}

/// Computes per-entry expiry for [`Slot`]s.
struct SlotExpiry;

impl SlotExpiry {
    fn positive_window(sliding: Duration, absolute_deadline: Instant, now: Instant) -> Duration {
        sliding.min(absolute_deadline.saturating_duration_since(now))
    }

    fn on_write<V>(slot: &Slot<V>, at: Instant) -> Duration {
        match slot {
            Slot::Positive { sliding, absolute_deadline, .. } => {
                Self::positive_window(*sliding, *absolute_deadline, at)
            },
            Slot::Negative { ttl } => *ttl,
        }
    }
}

impl<V> Expiry<String, Slot<V>> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Slot<V>,
        created_at: Instant,
    ) -> Option<Duration> {
        Some(Self::on_write(value, created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot<V>,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::on_write(value, updated_at))
    }

    fn expire_after_read(
        &self,
        _key: &String,
        value: &Slot<V>,
        read_at: Instant,
        duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        match value {
            Slot::Positive { sliding, absolute_deadline, .. } => {
                Some(Self::positive_window(*sliding, *absolute_deadline, read_at))
            },
            Slot::Negative { .. } => duration_until_expiry,
        }
    }
}

#[derive(Debug)]
struct PendingLoad {
    scope: String,
    invalidations: u64,
    tickets: usize,
}

type PendingLoads = Arc<Mutex<HashMap<String, PendingLoad>>>;

/// Proof that a load for one key started at a known point.
///
/// Obtained from [`LocalCache::begin_load`]. Dropping the ticket ends the
/// load's tracking, whether or not its result was stored.
pub struct LoadTicket {
    key: String,
    seen: u64,
    pending: PendingLoads,
}

impl LoadTicket {
    /// Returns `true` while no eviction has touched the key since the
    /// ticket was issued.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.pending.lock().get(&self.key).is_some_and(|load| load.invalidations == self.seen)
    }
}

impl Drop for LoadTicket {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if let Some(load) = pending.get_mut(&self.key) {
            load.tickets -= 1;
            if load.tickets == 0 {
                pending.remove(&self.key);
            }
        }
    }
}

impl std::fmt::Debug for LoadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTicket").field("key", &self.key).field("seen", &self.seen).finish()
    }
}

/// Pinned in-process cache holding positive and negative entries.
pub struct LocalCache<V> {
    name: &'static str,
    cache: Cache<String, Slot<V>>,
    scopes: Mutex<HashMap<String, HashSet<String>>>,
    pending: PendingLoads,
}

impl<V> LocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty cache. `name` labels log events.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        let cache = Cache::builder().name(name).expire_after(SlotExpiry).build();
        Self {
            name,
            cache,
            scopes: Mutex::new(HashMap::new()),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the cache's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Looks up `key`. A positive hit renews the entry's sliding deadline.
    pub async fn get(&self, key: &CacheKey) -> CacheEntry<V> {
        match self.cache.get(key.as_str()).await {
            Some(Slot::Positive { value, .. }) => CacheEntry::Positive(value),
            Some(Slot::Negative { .. }) => CacheEntry::Negative,
            None => CacheEntry::Absent,
        }
    }

    /// Stores a positive entry, replacing whatever `key` held.
    pub async fn put(&self, key: &CacheKey, value: V, ttl: TtlPolicy) {
        let slot = Slot::Positive {
            value,
            sliding: ttl.sliding(),
            absolute_deadline: Instant::now() + ttl.absolute(),
        };
        self.insert(key, slot).await;
    }

    /// Stores a negative entry that expires after `ttl`.
    pub async fn put_negative(&self, key: &CacheKey, ttl: Duration) {
        self.insert(key, Slot::Negative { ttl }).await;
    }

    /// Starts tracking evictions of `key` for a load about to run.
    #[must_use]
    pub fn begin_load(&self, key: &CacheKey) -> LoadTicket {
        let mut pending = self.pending.lock();
        let load = pending.entry(key.as_str().to_owned()).or_insert_with(|| PendingLoad {
            scope: key.scope().to_owned(),
            invalidations: 0,
            tickets: 0,
        });
        load.tickets += 1;
        LoadTicket { key: key.as_str().to_owned(), seen: load.invalidations, pending: Arc::clone(&self.pending) }
    }

    /// Stores `entry` only if `key` was not evicted since `ticket` was
    /// issued. [`CacheEntry::Absent`] is never stored.
    ///
    /// Returns `false` if the write was refused.
    pub async fn put_if_current(
        &self,
        key: &CacheKey,
        entry: CacheEntry<V>,
        ttl: TtlPolicy,
        negative_ttl: Duration,
        ticket: &LoadTicket,
    ) -> bool {
        if ticket.key != key.as_str() || !ticket.is_current() {
            return false;
        }
        match entry {
            CacheEntry::Positive(value) => self.put(key, value, ttl).await,
            CacheEntry::Negative => self.put_negative(key, negative_ttl).await,
            CacheEntry::Absent => return false,
        }
        // An eviction of this key may have run between the check and the
        // insert; it found nothing to remove, so undo the insert here.
        if !ticket.is_current() {
            self.unindex(key);
            self.cache.invalidate(key.as_str()).await;
            return false;
        }
        true
    }

    /// Removes `key`. Returns `true` if an entry was present.
    pub async fn evict(&self, key: &CacheKey) -> bool {
        if let Some(load) = self.pending.lock().get_mut(key.as_str()) {
            load.invalidations += 1;
        }
        self.unindex(key);
        self.cache.remove(key.as_str()).await.is_some()
    }

    /// Removes every key recorded under `scope`. Returns how many entries
    /// were present.
    pub async fn evict_scope(&self, scope: &str) -> usize {
        for load in self.pending.lock().values_mut().filter(|load| load.scope == scope) {
            load.invalidations += 1;
        }
        let keys = self.scopes.lock().remove(scope).unwrap_or_default();
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        for load in self.pending.lock().values_mut() {
            load.invalidations += 1;
        }
        self.scopes.lock().clear();
        self.cache.invalidate_all();
    }

    /// Number of keys with a load ticket outstanding.
    #[must_use]
    pub fn pending_loads(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns the number of cached entries.
    ///
    /// Eventually consistent; call [`sync`](Self::sync) first in tests.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Runs pending maintenance so [`entry_count`](Self::entry_count) is exact.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    #[cfg(test)]
    fn is_indexed(&self, key: &CacheKey) -> bool {
        self.scopes.lock().get(key.scope()).is_some_and(|keys| keys.contains(key.as_str()))
    }

    fn unindex(&self, key: &CacheKey) {
        let mut scopes = self.scopes.lock();
        if let Some(keys) = scopes.get_mut(key.scope()) {
            keys.remove(key.as_str());
            if keys.is_empty() {
                scopes.remove(key.scope());
            }
        }
    }

    async fn insert(&self, key: &CacheKey, slot: Slot<V>) {
        // Index first so a concurrent scope eviction cannot miss the entry.
        self.scopes
            .lock()
            .entry(key.scope().to_owned())
            .or_default()
            .insert(key.as_str().to_owned());
        self.cache.insert(key.as_str().to_owned(), slot).await;
    }
}

impl<V> std::fmt::Debug for LocalCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("name", &self.name)
            .field("entries", &self.cache.entry_count())
            .field("pending_loads", &self.pending.lock().len())
            .finish()
    }
}
