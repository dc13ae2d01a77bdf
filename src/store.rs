//! Versioned in-memory state store
//!
//! Holds the latest known value per key. A write only replaces the stored
//! value when its provenance is strictly later in chain order, so re-delivered
//! or reordered events converge on the same state regardless of arrival order.
//! Values are shared as `Arc`s and never mutated in place.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::config::thresholds::PAIR_TTL_SECS;
use crate::dex::{Pair, Provenance};

/// Capability required of anything kept in a [`VersionedStore`]
pub trait Versioned: Send + Sync {
    fn provenance(&self) -> &Provenance;

    /// Malformed values are dropped on write
    fn is_valid(&self) -> bool {
        true
    }

    /// Combine an accepted update with the value it replaces
    fn merge_previous(self, _previous: &Self) -> Self
    where
        Self: Sized,
    {
        self
    }

    /// Given a rejected (stale) update, optionally return an enriched copy of
    /// the current value. Must keep the current provenance.
    fn absorb_stale(&self, _stale: &Self) -> Option<Self>
    where
        Self: Sized,
    {
        None
    }
}

/// Concurrent keyed store with provenance-ordered writes and lazy expiry
pub struct VersionedStore<K, V> {
    entries: RwLock<HashMap<K, Arc<V>>>,
    ttl_secs: i64,
}

/// The store used for pair state
pub type PairStore = VersionedStore<alloy::primitives::Address, Pair>;

impl<K, V> Default for VersionedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Versioned,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> VersionedStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Versioned,
{
    pub fn new() -> Self {
        Self::with_ttl(PAIR_TTL_SECS)
    }

    pub fn with_ttl(ttl_secs: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    /// Apply a batch of updates. Returns how many entries changed.
    pub fn store<I>(&self, updates: I) -> usize
    where
        I: IntoIterator<Item = (K, V)>,
    {
        let updates: Vec<(K, V)> = updates.into_iter().filter(|(_, v)| v.is_valid()).collect();
        if updates.is_empty() {
            return 0;
        }

        let mut changed = 0;
        let mut entries = self.entries.write();
        for (key, value) in updates {
            match entries.get(&key) {
                Some(current) if !value.provenance().succeeds(current.provenance()) => {
                    if let Some(enriched) = current.absorb_stale(&value) {
                        entries.insert(key, Arc::new(enriched));
                        changed += 1;
                    }
                }
                Some(current) => {
                    let merged = value.merge_previous(current);
                    entries.insert(key, Arc::new(merged));
                    changed += 1;
                }
                None => {
                    entries.insert(key, Arc::new(value));
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.get_at(key, chrono::Utc::now().timestamp())
    }

    /// Single-entry read as of `now` (unix seconds). Expired entries are evicted.
    pub fn get_at(&self, key: &K, now: i64) -> Option<Arc<V>> {
        let value = self.entries.read().get(key).cloned()?;
        if value.provenance().is_expired(now, self.ttl_secs) {
            self.evict_expired(std::slice::from_ref(key), now);
            return None;
        }
        Some(value)
    }

    pub fn snapshot(&self) -> Vec<Arc<V>> {
        self.snapshot_at(chrono::Utc::now().timestamp())
    }

    /// All live entries as of `now`. The lock is only held while cloning the
    /// `Arc`s; expiry filtering runs outside it.
    pub fn snapshot_at(&self, now: i64) -> Vec<Arc<V>> {
        let all: Vec<(K, Arc<V>)> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();

        let mut live = Vec::with_capacity(all.len());
        let mut expired = Vec::new();
        for (key, value) in all {
            if value.provenance().is_expired(now, self.ttl_secs) {
                expired.push(key);
            } else {
                live.push(value);
            }
        }

        if !expired.is_empty() {
            let evicted = self.evict_expired(&expired, now);
            tracing::debug!("Evicted {} expired entries", evicted);
        }
        live
    }

    /// Remove `keys` whose current value is still expired. A writer may have
    /// refreshed a key between the read and this call; that value survives.
    fn evict_expired(&self, keys: &[K], now: i64) -> usize {
        let mut entries = self.entries.write();
        let mut evicted = 0;
        for key in keys {
            let still_expired = entries
                .get(key)
                .is_some_and(|v| v.provenance().is_expired(now, self.ttl_secs));
            if still_expired {
                entries.remove(key);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PairStore {
    /// Insert pairs keyed by their own address
    pub fn store_pairs<I>(&self, pairs: I) -> usize
    where
        I: IntoIterator<Item = Pair>,
    {
        self.store(pairs.into_iter().map(|p| (p.address, p)))
    }
}
