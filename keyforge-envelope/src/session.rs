//! Per-partition façade over [`EnvelopeEngine`], plus the optional
//! bounded, refcounted session cache described in §4.5.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::crypto::Aead;
use crate::envelope::{DataRowRecord, EnvelopeEngine};
use crate::error::Result;
use crate::kms::KeyManagementService;
use crate::metastore::Metastore;
use crate::partition::DefaultPartition;
use crate::policy::CryptoPolicy;

/// A caller-supplied lookup-by-key collaborator for `Session::store`/`load`.
/// The engine never interprets `key`; it is whatever the persistence
/// backend needs to find its bytes again.
pub trait Persistence: Send + Sync {
    fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A partition-scoped handle for encrypt/decrypt and store/load. Cheap
/// to clone: holds a reference to the (possibly shared) engine.
pub struct Session {
    partition_id: String,
    engine: Arc<EnvelopeEngine>,
    factory: Option<Arc<SessionFactoryInner>>,
}

impl Session {
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let drr = self.engine.encrypt_payload(plaintext)?;
        Ok(serde_json::to_vec(&drr)?)
    }

    pub fn decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let drr: DataRowRecord = serde_json::from_slice(bytes)?;
        self.engine.decrypt(&drr)
    }

    /// Encrypts `payload`, hands the serialized DRR to `persistence`
    /// under a freshly generated key, and returns that key.
    pub fn store(&self, payload: &[u8], persistence: &dyn Persistence) -> Result<String> {
        let bytes = self.encrypt(payload)?;
        let mut id_bytes = [0u8; 16];
        crate::crypto::fill_random(&mut id_bytes)?;
        let key = hex_encode(&id_bytes);
        persistence.store(&key, &bytes)?;
        Ok(key)
    }

    /// Fetches the DRR bytes for `key` from `persistence` and decrypts
    /// them, if present.
    pub fn load(&self, key: &str, persistence: &dyn Persistence) -> Result<Option<Vec<u8>>> {
        match persistence.load(key)? {
            Some(bytes) => Ok(Some(self.decrypt(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Closes the underlying engine, unless this session came from a
    /// factory with session caching enabled, in which case this only
    /// decrements the shared refcount.
    pub fn close(self) -> Result<()> {
        match &self.factory {
            Some(factory) => factory.release(&self.partition_id),
            None => self.engine.close(),
        }
    }
}

struct SessionEntry {
    engine: Arc<EnvelopeEngine>,
    refcount: usize,
    evicted: bool,
}

struct SessionFactoryInner {
    policy: Arc<CryptoPolicy>,
    metastore: Arc<dyn Metastore>,
    kms: Arc<dyn KeyManagementService>,
    aead: Arc<dyn Aead>,
    secret_factory: Arc<dyn keyforge_securemem::SecretFactory>,
    sk_cache: Arc<crate::key::cache::AnyKeyCache>,
    service: String,
    product: String,
    cache: Option<Mutex<SessionPool>>,
}

struct SessionPool {
    order: LruCache<String, ()>,
    entries: HashMap<String, SessionEntry>,
}

impl SessionFactoryInner {
    fn build_engine(&self, partition_id: &str) -> EnvelopeEngine {
        let partition = DefaultPartition::new(partition_id, &self.service, &self.product);
        EnvelopeEngine::new(
            &partition,
            Arc::clone(&self.policy),
            Arc::clone(&self.metastore),
            Arc::clone(&self.kms),
            Arc::clone(&self.aead),
            Arc::clone(&self.secret_factory),
            Arc::clone(&self.sk_cache),
        )
    }

    fn acquire(this: &Arc<Self>, partition_id: &str) -> Result<Session> {
        let Some(cache) = &this.cache else {
            return Ok(Session {
                partition_id: partition_id.to_string(),
                engine: Arc::new(this.build_engine(partition_id)),
                factory: None,
            });
        };

        let mut pool = cache.lock();
        if let Some(entry) = pool.entries.get_mut(partition_id) {
            entry.refcount += 1;
            let engine = Arc::clone(&entry.engine);
            let _ = pool.order.get(partition_id);
            return Ok(Session {
                partition_id: partition_id.to_string(),
                engine,
                factory: Some(Arc::clone(this)),
            });
        }

        let engine = Arc::new(this.build_engine(partition_id));
        pool.entries.insert(
            partition_id.to_string(),
            SessionEntry {
                engine: Arc::clone(&engine),
                refcount: 1,
                evicted: false,
            },
        );
        if let Some((evicted_id, ())) = pool.order.push(partition_id.to_string(), ()) {
            if evicted_id != partition_id {
                Self::evict_locked(&mut pool, &evicted_id);
            }
        }

        Ok(Session {
            partition_id: partition_id.to_string(),
            engine,
            factory: Some(Arc::clone(this)),
        })
    }

    fn evict_locked(pool: &mut SessionPool, partition_id: &str) {
        if let Some(entry) = pool.entries.get_mut(partition_id) {
            entry.evicted = true;
            if entry.refcount == 0 {
                if let Some(entry) = pool.entries.remove(partition_id) {
                    let _ = entry.engine.close();
                }
            }
        }
    }

    fn release(&self, partition_id: &str) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Ok(());
        };
        let mut pool = cache.lock();
        let should_close = if let Some(entry) = pool.entries.get_mut(partition_id) {
            entry.refcount = entry.refcount.saturating_sub(1);
            entry.refcount == 0 && entry.evicted
        } else {
            false
        };
        if should_close {
            if let Some(entry) = pool.entries.remove(partition_id) {
                return entry.engine.close();
            }
        }
        Ok(())
    }

    fn close_all(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            let mut pool = cache.lock();
            for (_, entry) in pool.entries.drain() {
                entry.engine.close()?;
            }
            pool.order.clear();
        }
        Ok(())
    }
}

/// Holds the collaborators shared by every session for one
/// `(service, product)` pair: the SK cache, metastore, KMS, AEAD,
/// secret factory, and policy.
pub struct SessionFactory {
    inner: Arc<SessionFactoryInner>,
}

impl SessionFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: impl Into<String>,
        product: impl Into<String>,
        policy: Arc<CryptoPolicy>,
        metastore: Arc<dyn Metastore>,
        kms: Arc<dyn KeyManagementService>,
        aead: Arc<dyn Aead>,
        secret_factory: Arc<dyn keyforge_securemem::SecretFactory>,
    ) -> Self {
        let sk_cache = Arc::new(if policy.cache_system_keys {
            crate::key::cache::AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
                policy.system_key_cache_max_size,
                policy.key_expiration.as_secs() as i64,
                policy.revoke_check_period.as_secs() as i64,
            ))
        } else {
            crate::key::cache::AnyKeyCache::Disabled
        });

        let cache = policy.cache_sessions.then(|| {
            Mutex::new(SessionPool {
                order: LruCache::new(NonZeroUsize::new(policy.session_cache_max_size.max(1) as usize).unwrap()),
                entries: HashMap::new(),
            })
        });

        SessionFactory {
            inner: Arc::new(SessionFactoryInner {
                policy,
                metastore,
                kms,
                aead,
                secret_factory,
                sk_cache,
                service: service.into(),
                product: product.into(),
                cache,
            }),
        }
    }

    pub fn get_session(&self, partition_id: &str) -> Result<Session> {
        SessionFactoryInner::acquire(&self.inner, partition_id)
    }

    /// Closes every pooled session's engine and the shared SK cache.
    pub fn close(&self) -> Result<()> {
        self.inner.close_all()?;
        self.inner.sk_cache.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::StaticKeyManagementService;
    use crate::metastore::InMemoryMetastore;
    use keyforge_securemem::NativeSecretFactory;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn factory(policy: CryptoPolicy) -> SessionFactory {
        SessionFactory::new(
            "service",
            "product",
            Arc::new(policy),
            Arc::new(InMemoryMetastore::new()),
            Arc::new(StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec())),
            Arc::new(crate::crypto::Aes256GcmAead),
            Arc::new(NativeSecretFactory),
        )
    }

    struct MapPersistence {
        map: StdMutex<HashMap<String, Vec<u8>>>,
    }

    impl Persistence for MapPersistence {
        fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
            self.map.lock().unwrap().insert(key.to_string(), bytes.to_vec());
            Ok(())
        }

        fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.map.lock().unwrap().get(key).cloned())
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let factory = factory(policy);
        let session = factory.get_session("user42").unwrap();

        let sealed = session.encrypt(b"hello").unwrap();
        assert_eq!(session.decrypt(&sealed).unwrap(), b"hello");
    }

    #[test]
    fn store_and_load_round_trip() {
        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let factory = factory(policy);
        let session = factory.get_session("user42").unwrap();
        let persistence = MapPersistence { map: StdMutex::new(HashMap::new()) };

        let key = session.store(b"payload", &persistence).unwrap();
        let loaded = session.load(&key, &persistence).unwrap();
        assert_eq!(loaded, Some(b"payload".to_vec()));
    }

    #[test]
    fn cached_sessions_share_the_same_engine() {
        let mut policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        policy.cache_sessions = true;
        let factory = factory(policy);

        let a = factory.get_session("user1").unwrap();
        let b = factory.get_session("user1").unwrap();
        assert!(Arc::ptr_eq(&a.engine, &b.engine));

        a.close().unwrap();
        // still referenced by `b`; a second encrypt must still work
        b.encrypt(b"still alive").unwrap();
        b.close().unwrap();
    }

    #[test]
    fn closing_uncached_session_closes_its_engine() {
        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let factory = factory(policy);
        let session = factory.get_session("user1").unwrap();
        let engine = Arc::clone(&session.engine);
        session.close().unwrap();
        // the engine itself only closes its IK cache; this call is idempotent
        engine.close().unwrap();
    }
}
