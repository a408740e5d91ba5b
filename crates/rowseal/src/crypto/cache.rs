//! Bounded, idle-evicted cache of keyed cipher and HMAC handles.
//!
//! Lookups go through a [`DashMap`], so concurrent readers only contend on the
//! shard that holds their key. Handles are built outside any shard lock; two
//! threads missing on the same key may both build one, and the last insert
//! wins. Handles are stateless, so either copy is as good as the other.

use std::{
    fmt,
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use rowseal_common::CryptoError;
use tracing::debug;

use super::{
    cipher::{CipherHandle, CipherSpec},
    digest::{HmacHandle, HmacSpec},
};

/// Default bound on entries per cache.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

/// Default idle window after which an unused handle is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct Slot<V> {
    value: Arc<V>,
    last_access: Instant,
}

/// Concurrent map whose entries expire after an idle window.
pub struct TimedCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    max_entries: usize,
    idle_timeout: Duration,
}

impl<K: Eq + Hash + Clone, V> TimedCache<K, V> {
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            idle_timeout,
        }
    }

    /// Live entry for `key`, refreshing its access time.
    ///
    /// An entry idle past the timeout is removed and reported as a miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let now = Instant::now();
        {
            let mut slot = self.entries.get_mut(key)?;
            if now.duration_since(slot.last_access) < self.idle_timeout {
                slot.last_access = now;
                return Some(Arc::clone(&slot.value));
            }
        }
        // Re-checked under the shard lock; another thread may have refreshed it.
        self.entries
            .remove_if(key, |_, slot| now.duration_since(slot.last_access) >= self.idle_timeout);
        None
    }

    /// Return the cached value or build, insert and return a new one.
    ///
    /// # Errors
    ///
    /// Propagates the error from `build`; nothing is cached in that case.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: &K,
        build: impl FnOnce() -> Result<V, E>,
    ) -> Result<Arc<V>, E> {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        let value = Arc::new(build()?);
        self.evict();
        self.entries.insert(
            key.clone(),
            Slot {
                value: Arc::clone(&value),
                last_access: Instant::now(),
            },
        );
        Ok(value)
    }

    /// Drop expired entries, then the least recently used ones until there is
    /// room for one more insert.
    fn evict(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, slot| now.duration_since(slot.last_access) < self.idle_timeout);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_access)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K, V> fmt::Debug for TimedCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedCache")
            .field("len", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Shared cache for every cipher and HMAC handle the pipeline needs.
///
/// Constructed once and handed to the engines; never a process-wide static.
#[derive(Debug)]
pub struct EngineCache {
    ciphers: TimedCache<CipherSpec, CipherHandle>,
    hmacs: TimedCache<HmacSpec, HmacHandle>,
}

impl EngineCache {
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            ciphers: TimedCache::new(max_entries, idle_timeout),
            hmacs: TimedCache::new(max_entries, idle_timeout),
        }
    }

    /// Cipher handle for `spec`, built on first use or after idle expiry.
    ///
    /// # Errors
    ///
    /// Returns the [`CryptoError`] from [`CipherHandle::new`].
    pub fn cipher(&self, spec: &CipherSpec) -> Result<Arc<CipherHandle>, CryptoError> {
        self.ciphers.get_or_try_insert_with(spec, || {
            debug!(algorithm = ?spec.algorithm, mode = ?spec.mode, "building cipher handle");
            CipherHandle::new(spec)
        })
    }

    /// HMAC handle for `spec`, built on first use or after idle expiry.
    ///
    /// # Errors
    ///
    /// Returns the [`CryptoError`] from [`HmacHandle::new`].
    pub fn hmac(&self, spec: &HmacSpec) -> Result<Arc<HmacHandle>, CryptoError> {
        self.hmacs.get_or_try_insert_with(spec, || {
            debug!(algorithm = ?spec.algorithm, "building hmac handle");
            HmacHandle::new(spec)
        })
    }
}

impl Default for EngineCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, DEFAULT_IDLE_TIMEOUT)
    }
}
