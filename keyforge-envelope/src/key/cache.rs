//! Bounded, TTL- and revocation-aware cache of [`CryptoKey`]s.
//!
//! One instance per cache type per process: the SK cache is shared
//! across sessions, the IK cache is per-session. Both enforce a single
//! reader-writer index plus a keyed load-lock so that at most one
//! in-flight load runs per `(id, created)` — concurrent callers for the
//! same key block on the loader's result rather than racing it.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::envelope::KeyMeta;
use crate::error::Result;
use crate::key::CryptoKey;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Resolves a specific `(id, created)` key on a cache miss.
pub trait Loader: Send + Sync {
    fn load(&self, meta: &KeyMeta) -> Result<CryptoKey>;
}

/// Drives `get_or_load_latest`: produces a fresh candidate on a cache
/// miss, and judges whether a cache hit has gone stale enough to need
/// re-validation (e.g. a revocation check against the metastore).
pub trait Reloader: Send + Sync {
    fn load(&self) -> Result<CryptoKey>;
    fn is_invalid(&self, key: &CryptoKey) -> bool;
}

struct Entry {
    key: Arc<CryptoKey>,
    revocation_last_checked: i64,
}

/// A bounded LRU of [`CryptoKey`]s keyed by `(id, created)`, with a
/// separate "most recently seen `created` per `id`" pointer for
/// `get_or_load_latest`.
pub struct KeyCache {
    ttl_secs: i64,
    revoke_check_period_secs: i64,
    index: RwLock<LruCache<KeyMeta, Entry>>,
    latest: RwLock<HashMap<String, i64>>,
    load_locks: Mutex<HashMap<KeyMeta, Arc<Mutex<()>>>>,
}

impl KeyCache {
    pub fn new(max_size: usize, ttl_secs: i64, revoke_check_period_secs: i64) -> Self {
        KeyCache {
            ttl_secs,
            revoke_check_period_secs,
            index: RwLock::new(LruCache::new(NonZeroUsize::new(max_size.max(1)).unwrap())),
            latest: RwLock::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
        }
    }

    fn is_expired(&self, created: i64) -> bool {
        now() - created > self.ttl_secs
    }

    fn per_key_lock(&self, meta: &KeyMeta) -> Arc<Mutex<()>> {
        self.load_locks
            .lock()
            .entry(meta.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_per_key_lock(&self, meta: &KeyMeta) {
        let mut locks = self.load_locks.lock();
        if let Some(lock) = locks.get(meta) {
            if Arc::strong_count(lock) == 1 {
                locks.remove(meta);
            }
        }
    }

    /// Returns the cached key for `meta` if present, not expired, and
    /// not revoked; evicts and closes it otherwise.
    fn lookup_valid(&self, meta: &KeyMeta) -> Option<Arc<CryptoKey>> {
        let mut index = self.index.write();
        let invalid = match index.get(meta) {
            Some(entry) => entry.key.is_revoked() || self.is_expired(entry.key.created()),
            None => return None,
        };
        if invalid {
            if let Some(entry) = index.pop(meta) {
                let _ = entry.key.close();
            }
            return None;
        }
        index.get(meta).map(|entry| Arc::clone(&entry.key))
    }

    fn insert(&self, meta: KeyMeta, key: Arc<CryptoKey>) {
        let mut index = self.index.write();
        if let Some((_, evicted)) = index.push(
            meta,
            Entry {
                key,
                revocation_last_checked: now(),
            },
        ) {
            let _ = evicted.key.close();
        }
    }

    fn evict(&self, meta: &KeyMeta) {
        if let Some(entry) = self.index.write().pop(meta) {
            let _ = entry.key.close();
        }
    }

    fn bump_latest(&self, id: &str, created: i64) {
        let mut latest = self.latest.write();
        let slot = latest.entry(id.to_string()).or_insert(created);
        if created > *slot {
            *slot = created;
        }
    }

    /// Returns the cached key if present and not expired; otherwise
    /// calls `loader.load(meta)`, inserts the result, and returns it.
    /// At most one `load` call runs per `meta` at a time.
    pub fn get_or_load(&self, meta: &KeyMeta, loader: &dyn Loader) -> Result<Arc<CryptoKey>> {
        if let Some(key) = self.lookup_valid(meta) {
            return Ok(key);
        }

        let lock = self.per_key_lock(meta);
        let guard = lock.lock();
        let result = (|| {
            if let Some(key) = self.lookup_valid(meta) {
                return Ok(key);
            }
            let fresh = Arc::new(loader.load(meta)?);
            self.insert(meta.clone(), Arc::clone(&fresh));
            Ok(fresh)
        })();
        drop(guard);
        self.release_per_key_lock(meta);
        result
    }

    fn lookup_latest_valid(
        &self,
        id: &str,
        reloader: &dyn Reloader,
    ) -> Option<Arc<CryptoKey>> {
        let created = *self.latest.read().get(id)?;
        let meta = KeyMeta::new(id, created);
        let key = self.lookup_valid(&meta)?;

        let needs_check = {
            let mut index = self.index.write();
            match index.get_mut(&meta) {
                Some(entry) if now() - entry.revocation_last_checked > self.revoke_check_period_secs => {
                    entry.revocation_last_checked = now();
                    true
                }
                _ => false,
            }
        };

        if needs_check && reloader.is_invalid(&key) {
            self.evict(&meta);
            return None;
        }

        Some(key)
    }

    /// Returns the most-recently-seen key for `id` if present, not
    /// expired, and not found invalid by a due revocation check.
    /// Otherwise calls `reloader.load()`; if the candidate duplicates an
    /// already-cached `(id, created)` the cached instance wins and the
    /// candidate is closed, else the candidate becomes the new latest.
    pub fn get_or_load_latest(&self, id: &str, reloader: &dyn Reloader) -> Result<Arc<CryptoKey>> {
        if let Some(key) = self.lookup_latest_valid(id, reloader) {
            return Ok(key);
        }

        let sentinel = KeyMeta::new(id, 0);
        let lock = self.per_key_lock(&sentinel);
        let guard = lock.lock();
        let result = (|| {
            if let Some(key) = self.lookup_latest_valid(id, reloader) {
                return Ok(key);
            }

            let candidate = reloader.load()?;
            let created = candidate.created();
            let meta = KeyMeta::new(id, created);

            if let Some(existing) = self.lookup_valid(&meta) {
                candidate.close()?;
                self.bump_latest(id, created);
                return Ok(existing);
            }

            let key = Arc::new(candidate);
            self.insert(meta, Arc::clone(&key));
            self.bump_latest(id, created);
            Ok(key)
        })();
        drop(guard);
        self.release_per_key_lock(&sentinel);
        result
    }

    /// Closes every cached key and drops the index and latest pointers.
    pub fn close(&self) -> Result<()> {
        let mut index = self.index.write();
        for (_, entry) in index.iter() {
            let _ = entry.key.close();
        }
        index.clear();
        self.latest.write().clear();
        Ok(())
    }
}

/// Selects whether a key lookup is cached or performed and closed
/// immediately, per `policy.cache_system_keys` / `cache_intermediate_keys`.
///
/// When caching is disabled the cache's ownership model doesn't apply:
/// the caller that requested the key becomes responsible for closing it.
pub enum AnyKeyCache {
    Cached(KeyCache),
    Disabled,
}

impl AnyKeyCache {
    pub fn get_or_load(&self, meta: &KeyMeta, loader: &dyn Loader) -> Result<CacheHandle> {
        match self {
            AnyKeyCache::Cached(cache) => Ok(CacheHandle::Shared(cache.get_or_load(meta, loader)?)),
            AnyKeyCache::Disabled => Ok(CacheHandle::Owned(Arc::new(loader.load(meta)?))),
        }
    }

    pub fn get_or_load_latest(&self, id: &str, reloader: &dyn Reloader) -> Result<CacheHandle> {
        match self {
            AnyKeyCache::Cached(cache) => {
                Ok(CacheHandle::Shared(cache.get_or_load_latest(id, reloader)?))
            }
            AnyKeyCache::Disabled => Ok(CacheHandle::Owned(Arc::new(reloader.load()?))),
        }
    }

    pub fn close(&self) -> Result<()> {
        match self {
            AnyKeyCache::Cached(cache) => cache.close(),
            AnyKeyCache::Disabled => Ok(()),
        }
    }
}

/// A key obtained through [`AnyKeyCache`]. `Owned` handles must be
/// explicitly [`finish`](CacheHandle::finish)ed by the caller once done;
/// `Shared` handles remain owned by the cache.
pub enum CacheHandle {
    Shared(Arc<CryptoKey>),
    Owned(Arc<CryptoKey>),
}

impl CacheHandle {
    pub fn key(&self) -> &CryptoKey {
        match self {
            CacheHandle::Shared(k) | CacheHandle::Owned(k) => k,
        }
    }

    /// Closes the key if this handle owns it outright (caching disabled).
    pub fn finish(self) -> Result<()> {
        if let CacheHandle::Owned(key) = self {
            key.close()?;
        }
        Ok(())
    }
}
