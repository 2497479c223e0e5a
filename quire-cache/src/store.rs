//! In-memory TTL store.
//!
//! Every entry carries an absolute deadline. Reads treat an expired entry as
//! absent even if it is still physically present; the background sweeper
//! only reclaims memory.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::CacheConfig;

/// Stored value with its deadline.
#[derive(Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            inserted_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Result of [`TtlStore::get_or_insert_with`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Claim<V> {
    /// A live entry already existed; holds a clone of its value.
    Existing(V),
    /// The key was absent (or expired) and the new value was inserted.
    Inserted,
}

/// Thread-safe key/value store with per-entry expiration.
///
/// All operations take the lock once, so each one is atomic with respect
/// to the others. [`get_or_insert_with`](Self::get_or_insert_with) and
/// [`remove_if`](Self::remove_if) exist for callers that coordinate through
/// the store and cannot afford a gap between check and write.
pub struct TtlStore<K, V> {
    entries: RwLock<HashMap<K, Entry<V>>>,
    config: CacheConfig,
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates a new store with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    /// Creates a store with custom configuration.
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.max_entries.min(1024))),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Inserts or overwrites `key` with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl());
    }

    /// Inserts or overwrites `key`, expiring after `ttl`.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut entries = self.entries.write();
        self.insert_locked(&mut entries, key, Entry::new(value, ttl));
    }

    /// Returns true iff a live entry exists for `key`.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| !e.is_expired())
    }

    /// Returns the live value for `key`, or `None` if absent or expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.read();
        entries.get(key).and_then(|e| {
            if e.is_expired() {
                None
            } else {
                Some(e.value.clone())
            }
        })
    }

    /// Removes `key`. No-op if absent.
    pub fn del<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().remove(key);
    }

    /// Removes every entry.
    pub fn flush(&self) {
        self.entries.write().clear();
    }

    /// Returns the live value for `key`, or inserts `make()` with the
    /// default TTL if there is none.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> Claim<V> {
        let mut entries = self.entries.write();

        if let Some(entry) = entries.get(&key) {
            if !entry.is_expired() {
                return Claim::Existing(entry.value.clone());
            }
        }

        let entry = Entry::new(make(), self.config.default_ttl());
        self.insert_locked(&mut entries, key, entry);
        Claim::Inserted
    }

    /// Removes and returns the live value for `key` if `pred` accepts it.
    ///
    /// An expired entry is never returned.
    pub fn remove_if<Q>(&self, key: &Q, pred: impl FnOnce(&V) -> bool) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut entries = self.entries.write();

        let matches = entries
            .get(key)
            .is_some_and(|e| !e.is_expired() && pred(&e.value));

        if matches {
            entries.remove(key).map(|e| e.value)
        } else {
            None
        }
    }

    /// Removes all expired entries, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write();
        Self::cleanup_expired_internal(&mut entries)
    }

    fn cleanup_expired_internal(entries: &mut HashMap<K, Entry<V>>) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        before - entries.len()
    }

    fn insert_locked(&self, entries: &mut HashMap<K, Entry<V>>, key: K, entry: Entry<V>) {
        if !entries.contains_key(&key) && entries.len() >= self.config.max_entries {
            Self::cleanup_expired_internal(entries);

            // Still at capacity? Remove oldest entry
            if entries.len() >= self.config.max_entries {
                if let Some(oldest_key) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.inserted_at)
                    .map(|(k, _)| k.clone())
                {
                    entries.remove(&oldest_key);
                }
            }
        }

        entries.insert(key, entry);
    }

    /// Returns the number of stored entries, including expired ones not yet
    /// swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StoreStats {
        let entries = self.entries.read();
        let expired = entries.values().filter(|e| e.is_expired()).count();

        StoreStats {
            total_entries: entries.len(),
            expired_entries: expired,
            valid_entries: entries.len() - expired,
            capacity: self.config.max_entries,
        }
    }
}

impl<K, V> TtlStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts the background sweep at the configured period.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped. Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        self.spawn_sweeper_every(self.config.sweep_interval())
    }

    /// Starts the background sweep with an explicit period.
    pub fn spawn_sweeper_every(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.cleanup_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Swept expired cache entries");
                }
            }
        })
    }
}

impl<K, V> Default for TtlStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Store statistics.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStats {
    /// Total entries (including expired)
    pub total_entries: usize,
    /// Expired entries
    pub expired_entries: usize,
    /// Valid (non-expired) entries
    pub valid_entries: usize,
    /// Maximum capacity
    pub capacity: usize,
}
