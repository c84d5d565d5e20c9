//! Expiring Key-Value Store
//!
//! A concurrency-safe map from string keys to values of one type, with a
//! single time-to-live applied to every entry. Expiry is lazy: entries are
//! checked when accessed and removed then, or in bulk by [`ExpiringStore::purge_expired`].
//!
//! The map is sharded (`DashMap`), so callers on different keys rarely
//! contend. Each shard is guarded by its own lock, which makes every
//! operation linearizable per key.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::{Error, Result};

/// A stored value together with its expiry deadline.
#[derive(Debug, Clone)]
pub struct StoreEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> StoreEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Returns true once the entry must no longer be served.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-memory store with per-instance TTL.
///
/// Values are cloned out on every read, so `V` is normally an `Arc` handle
/// to the record.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use durable::store::ExpiringStore;
///
/// let store = ExpiringStore::new("greeting", Duration::from_secs(60));
/// store.set("hello", "world".to_string());
/// assert_eq!(store.get("hello").unwrap(), "world");
/// assert!(store.get("missing").unwrap_err().is_not_found());
/// ```
#[derive(Debug)]
pub struct ExpiringStore<V> {
    kind: &'static str,
    ttl: Duration,
    entries: DashMap<String, StoreEntry<V>>,
}

impl<V: Clone> ExpiringStore<V> {
    /// Creates an empty store. `kind` names the stored records in errors.
    pub fn new(kind: &'static str, ttl: Duration) -> Self {
        Self {
            kind,
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Returns the TTL applied to every write.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or overwrites a value and resets its expiry to now + TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries
            .insert(key.into(), StoreEntry::new(value, self.ttl));
    }

    /// Returns the live value for `key`.
    ///
    /// An expired entry is removed and reported as `NotFound`.
    pub fn get(&self, key: &str) -> Result<V> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Ok(entry.value.clone());
            }
        }

        // The shard guard above is released; only drop the entry if it is
        // still expired, a concurrent `set` may have refreshed it.
        self.entries
            .remove_if(key, |_, entry| entry.is_expired(now));
        Err(Error::not_found(self.kind, key))
    }

    /// Returns true iff a `get` issued now would succeed.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Returns the live value for `key`, inserting `init()` when there is none.
    ///
    /// The check and the insert happen under the same shard lock, so
    /// concurrent callers on one key all observe the same value. An existing
    /// live entry keeps its current expiry.
    pub fn get_or_insert_with(&self, key: &str, init: impl FnOnce() -> V) -> V {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    let value = init();
                    occupied.insert(StoreEntry::new(value.clone(), self.ttl));
                    value
                } else {
                    occupied.get().value.clone()
                }
            }
            Entry::Vacant(vacant) => {
                let value = init();
                vacant.insert(StoreEntry::new(value.clone(), self.ttl));
                value
            }
        }
    }

    /// Removes `key`, returning whether a live entry was dropped.
    pub fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .remove(key)
            .map(|(_, entry)| !entry.is_expired(now))
            .unwrap_or(false)
    }

    /// Physically removes every expired entry and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
