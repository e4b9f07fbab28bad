//! Full SK/IK lifecycle, the duplicate-write race protocol, and
//! encrypt/decrypt orchestration.

use std::sync::Arc;

use zeroize::Zeroize;

use crate::crypto::{Aead, GCM_KEY_SIZE};
use crate::envelope::{DataRowRecord, EnvelopeKeyRecord, KeyMeta};
use crate::error::{Error, Result};
use crate::key::cache::{AnyKeyCache, Loader, Reloader};
use crate::key::CryptoKey;
use crate::kms::KeyManagementService;
use crate::metastore::Metastore;
use crate::partition::Partition;
use crate::policy::CryptoPolicy;
use crate::util::now_unix;
use keyforge_securemem::SecretFactory;

fn is_envelope_invalid(ekr: &EnvelopeKeyRecord, policy: &CryptoPolicy) -> bool {
    policy.is_key_expired(ekr.created, now_unix()) || ekr.is_revoked()
}

fn decrypt_sk_record(
    kms: &dyn KeyManagementService,
    secret_factory: &dyn SecretFactory,
    ekr: &EnvelopeKeyRecord,
) -> Result<CryptoKey> {
    let mut plaintext = kms.decrypt_key(&ekr.encrypted_key)?;
    let sk = CryptoKey::from_bytes(secret_factory, &plaintext, ekr.created);
    plaintext.zeroize();
    sk
}

/// Owns the partition's SK/IK ids, its own IK cache, and handles to the
/// shared collaborators: policy, metastore, KMS, AEAD, secret factory,
/// and the process-wide SK cache.
pub struct EnvelopeEngine {
    sk_id: String,
    ik_id: String,
    policy: Arc<CryptoPolicy>,
    metastore: Arc<dyn Metastore>,
    kms: Arc<dyn KeyManagementService>,
    aead: Arc<dyn Aead>,
    secret_factory: Arc<dyn SecretFactory>,
    sk_cache: Arc<AnyKeyCache>,
    ik_cache: AnyKeyCache,
}

impl EnvelopeEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partition: &dyn Partition,
        policy: Arc<CryptoPolicy>,
        metastore: Arc<dyn Metastore>,
        kms: Arc<dyn KeyManagementService>,
        aead: Arc<dyn Aead>,
        secret_factory: Arc<dyn SecretFactory>,
        sk_cache: Arc<AnyKeyCache>,
    ) -> Self {
        let ik_cache = if policy.cache_intermediate_keys {
            AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
                policy.intermediate_key_cache_max_size,
                policy.key_expiration.as_secs() as i64,
                policy.revoke_check_period.as_secs() as i64,
            ))
        } else {
            AnyKeyCache::Disabled
        };

        EnvelopeEngine {
            sk_id: partition.system_key_id().to_string(),
            ik_id: partition.intermediate_key_id().to_string(),
            policy,
            metastore,
            kms,
            aead,
            secret_factory,
            sk_cache,
            ik_cache,
        }
    }

    pub fn ik_id(&self) -> &str {
        &self.ik_id
    }

    /// `encrypt_payload`: wraps `plaintext` under a fresh, single-use DRK,
    /// wraps the DRK under the partition's current IK.
    pub fn encrypt_payload(&self, plaintext: &[u8]) -> Result<DataRowRecord> {
        let ik_reloader = IkReloader { engine: self };
        let ik_handle = self.ik_cache.get_or_load_latest(&self.ik_id, &ik_reloader)?;
        let ik = ik_handle.key();

        let drk = CryptoKey::generate(self.secret_factory.as_ref(), GCM_KEY_SIZE, now_unix())?;

        let encrypted_payload = drk.with_bytes(|drk_bytes| self.aead.encrypt(plaintext, drk_bytes))??;
        let wrapped_drk = ik
            .with_bytes(|ik_bytes| -> Result<Vec<u8>> {
                drk.with_bytes(|drk_bytes| self.aead.encrypt(drk_bytes, ik_bytes))?
            })??;

        let record = DataRowRecord {
            key: EnvelopeKeyRecord {
                created: drk.created(),
                encrypted_key: wrapped_drk,
                parent_key_meta: Some(KeyMeta::new(self.ik_id.clone(), ik.created())),
                revoked: None,
            },
            data: encrypted_payload,
        };

        drk.close()?;
        ik_handle.finish()?;
        Ok(record)
    }

    /// `decrypt`: reverses `encrypt_payload`, starting from the DRR's
    /// parent-key reference. Rejects records from a foreign partition.
    pub fn decrypt(&self, drr: &DataRowRecord) -> Result<Vec<u8>> {
        let parent = drr
            .key
            .parent_key_meta
            .as_ref()
            .ok_or_else(|| Error::MetadataMissing("data row record has no parent key meta".into()))?;

        if parent.id != self.ik_id {
            return Err(Error::PartitionMismatch {
                expected: self.ik_id.clone(),
                found: parent.id.clone(),
            });
        }

        let ik_loader = IkLoader { engine: self };
        let meta = KeyMeta::new(parent.id.clone(), parent.created);
        let ik_handle = self.ik_cache.get_or_load(&meta, &ik_loader)?;
        let ik = ik_handle.key();

        if self.policy.notify_expired_ik_read && self.policy.is_key_expired(ik.created(), now_unix()) {
            log::warn!(
                "decrypt read an expired intermediate key {} created at {}",
                self.ik_id,
                ik.created()
            );
        }

        let mut drk_bytes = ik.with_bytes(|ik_bytes| self.aead.decrypt(&drr.key.encrypted_key, ik_bytes))??;
        let drk = CryptoKey::from_bytes(self.secret_factory.as_ref(), &drk_bytes, drr.key.created)?;
        drk_bytes.zeroize();

        let plaintext = drk.with_bytes(|drk_bytes| self.aead.decrypt(&drr.data, drk_bytes))??;
        drk.close()?;
        ik_handle.finish()?;
        Ok(plaintext)
    }

    /// `load_latest_or_create_ik`: returns the current IK, rotating it
    /// (per §4.4.5) if the latest metastore record is stale or its
    /// parent SK can no longer be resolved.
    fn load_latest_or_create_ik(&self) -> Result<CryptoKey> {
        if let Some(ekr) = self.metastore.load_latest(&self.ik_id)? {
            if !is_envelope_invalid(&ekr, &self.policy) {
                if let Some(parent) = ekr.parent_key_meta.clone() {
                    let sk_meta = KeyMeta::new(parent.id.clone(), parent.created);
                    if let Ok(sk_handle) = self.sk_cache.get_or_load(&sk_meta, &SkExactLoader { engine: self }) {
                        let sk = sk_handle.key();
                        let sk_is_valid = matches!(
                            self.metastore.load(&parent.id, parent.created),
                            Ok(Some(ref sk_ekr)) if !is_envelope_invalid(sk_ekr, &self.policy)
                        );

                        if sk_is_valid {
                            if self.policy.notify_expired_sk_read
                                && self.policy.is_key_expired(sk.created(), now_unix())
                            {
                                log::warn!("IK rotation read an expired system key {}", self.sk_id);
                            }
                            let mut ik_bytes =
                                sk.with_bytes(|sk_bytes| self.aead.decrypt(&ekr.encrypted_key, sk_bytes))??;
                            let ik =
                                CryptoKey::from_bytes(self.secret_factory.as_ref(), &ik_bytes, ekr.created);
                            ik_bytes.zeroize();
                            sk_handle.finish()?;
                            return ik;
                        }

                        // parent SK is expired or revoked: fall through to
                        // rotation rather than wrapping a fresh IK under a
                        // stale SK.
                        sk_handle.finish()?;
                    }
                }
            }
        }

        self.create_ik()
    }

    fn create_ik(&self) -> Result<CryptoKey> {
        let sk_reloader = SkReloader { engine: self };
        let sk_handle = self.sk_cache.get_or_load_latest(&self.sk_id, &sk_reloader)?;
        let sk = sk_handle.key();

        let created = CryptoPolicy::truncate_to_precision(now_unix(), self.policy.intermediate_key_precision);
        let ik = CryptoKey::generate(self.secret_factory.as_ref(), GCM_KEY_SIZE, created)?;

        let wrapped_ik = sk
            .with_bytes(|sk_bytes| -> Result<Vec<u8>> {
                ik.with_bytes(|ik_bytes| self.aead.encrypt(ik_bytes, sk_bytes))?
            })??;

        let record = EnvelopeKeyRecord {
            created,
            encrypted_key: wrapped_ik,
            parent_key_meta: Some(KeyMeta::new(self.sk_id.clone(), sk.created())),
            revoked: None,
        };

        if self.metastore.store(&self.ik_id, created, &record)? {
            sk_handle.finish()?;
            return Ok(ik);
        }

        // duplicate-write: another writer created this (id, created) first.
        // close ours and retry exactly once.
        ik.close()?;
        let ekr = self
            .metastore
            .load_latest(&self.ik_id)?
            .ok_or_else(|| Error::MetadataMissing(format!("ik {} vanished after duplicate store", self.ik_id)))?;
        let parent = ekr
            .parent_key_meta
            .clone()
            .ok_or_else(|| Error::MetadataMissing(format!("ik {} row missing parent key meta", self.ik_id)))?;

        let sk_for_decrypt = if parent.created == sk.created() {
            sk_handle
        } else {
            sk_handle.finish()?;
            let sk_meta = KeyMeta::new(parent.id.clone(), parent.created);
            self.sk_cache.get_or_load(&sk_meta, &SkExactLoader { engine: self })?
        };

        let mut ik_bytes =
            sk_for_decrypt.key().with_bytes(|sk_bytes| self.aead.decrypt(&ekr.encrypted_key, sk_bytes))??;
        let result = CryptoKey::from_bytes(self.secret_factory.as_ref(), &ik_bytes, ekr.created);
        ik_bytes.zeroize();
        sk_for_decrypt.finish()?;
        result
    }

    /// `load_latest_or_create_sk`: same structure as IK creation, except
    /// the wrapping parent is the KMS rather than an AEAD-wrapping key.
    fn load_latest_or_create_sk(&self) -> Result<CryptoKey> {
        if let Some(ekr) = self.metastore.load_latest(&self.sk_id)? {
            if !is_envelope_invalid(&ekr, &self.policy) {
                return decrypt_sk_record(self.kms.as_ref(), self.secret_factory.as_ref(), &ekr);
            }
        }

        let created = CryptoPolicy::truncate_to_precision(now_unix(), self.policy.system_key_precision);
        let sk = CryptoKey::generate(self.secret_factory.as_ref(), GCM_KEY_SIZE, created)?;
        let wrapped_sk = sk.with_bytes(|sk_bytes| self.kms.encrypt_key(sk_bytes))??;

        let record = EnvelopeKeyRecord {
            created,
            encrypted_key: wrapped_sk,
            parent_key_meta: None,
            revoked: None,
        };

        if self.metastore.store(&self.sk_id, created, &record)? {
            return Ok(sk);
        }

        sk.close()?;
        let ekr = self
            .metastore
            .load_latest(&self.sk_id)?
            .ok_or_else(|| Error::MetadataMissing(format!("sk {} vanished after duplicate store", self.sk_id)))?;
        decrypt_sk_record(self.kms.as_ref(), self.secret_factory.as_ref(), &ekr)
    }

    /// Closes this engine's IK cache. The shared SK cache outlives the
    /// engine and is closed by the owning [`crate::session::SessionFactory`].
    pub fn close(&self) -> Result<()> {
        self.ik_cache.close()
    }
}

struct SkExactLoader<'a> {
    engine: &'a EnvelopeEngine,
}

impl Loader for SkExactLoader<'_> {
    fn load(&self, meta: &KeyMeta) -> Result<CryptoKey> {
        let ekr = self
            .engine
            .metastore
            .load(&meta.id, meta.created)?
            .ok_or_else(|| Error::MetadataMissing(format!("sk {} @ {} not found", meta.id, meta.created)))?;
        decrypt_sk_record(self.engine.kms.as_ref(), self.engine.secret_factory.as_ref(), &ekr)
    }
}

struct SkReloader<'a> {
    engine: &'a EnvelopeEngine,
}

impl Reloader for SkReloader<'_> {
    fn load(&self) -> Result<CryptoKey> {
        self.engine.load_latest_or_create_sk()
    }

    fn is_invalid(&self, key: &CryptoKey) -> bool {
        match self.engine.metastore.load(&self.engine.sk_id, key.created()) {
            Ok(Some(ekr)) => is_envelope_invalid(&ekr, &self.engine.policy),
            _ => true,
        }
    }
}

struct IkLoader<'a> {
    engine: &'a EnvelopeEngine,
}

impl Loader for IkLoader<'_> {
    fn load(&self, meta: &KeyMeta) -> Result<CryptoKey> {
        let ekr = self
            .engine
            .metastore
            .load(&meta.id, meta.created)?
            .ok_or_else(|| Error::MetadataMissing(format!("ik {} @ {} not found", meta.id, meta.created)))?;
        let parent = ekr
            .parent_key_meta
            .clone()
            .ok_or_else(|| Error::MetadataMissing(format!("ik {} row missing parent key meta", meta.id)))?;

        let sk_meta = KeyMeta::new(parent.id.clone(), parent.created);
        let sk_handle = self
            .engine
            .sk_cache
            .get_or_load(&sk_meta, &SkExactLoader { engine: self.engine })?;
        let sk = sk_handle.key();

        if self.engine.policy.notify_expired_sk_read && self.engine.policy.is_key_expired(sk.created(), now_unix())
        {
            log::warn!("decrypt read an expired system key {}", self.engine.sk_id);
        }

        let mut plaintext =
            sk.with_bytes(|sk_bytes| self.engine.aead.decrypt(&ekr.encrypted_key, sk_bytes))??;
        let result = CryptoKey::from_bytes(self.engine.secret_factory.as_ref(), &plaintext, ekr.created);
        plaintext.zeroize();
        sk_handle.finish()?;
        result
    }
}

struct IkReloader<'a> {
    engine: &'a EnvelopeEngine,
}

impl Reloader for IkReloader<'_> {
    fn load(&self) -> Result<CryptoKey> {
        self.engine.load_latest_or_create_ik()
    }

    fn is_invalid(&self, key: &CryptoKey) -> bool {
        match self.engine.metastore.load(&self.engine.ik_id, key.created()) {
            Ok(Some(ekr)) => is_envelope_invalid(&ekr, &self.engine.policy),
            _ => true,
        }
    }
}

// CacheHandle re-exported via key::cache for callers outside this module
// that need to hold onto a resolved key (e.g. Session::store/load).
pub use crate::key::cache::CacheHandle as EngineKeyHandle;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::StaticKeyManagementService;
    use crate::metastore::InMemoryMetastore;
    use crate::partition::DefaultPartition;
    use crate::policy::CryptoPolicy;
    use keyforge_securemem::NativeSecretFactory;
    use std::time::Duration;

    fn test_engine(policy: CryptoPolicy, partition: DefaultPartition) -> EnvelopeEngine {
        let metastore: Arc<dyn Metastore> = Arc::new(InMemoryMetastore::new());
        let kms: Arc<dyn KeyManagementService> =
            Arc::new(StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec()));
        let aead: Arc<dyn Aead> = Arc::new(crate::crypto::Aes256GcmAead);
        let secret_factory: Arc<dyn SecretFactory> = Arc::new(NativeSecretFactory);
        let sk_cache = Arc::new(AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
            1000,
            policy.key_expiration.as_secs() as i64,
            policy.revoke_check_period.as_secs() as i64,
        )));
        EnvelopeEngine::new(&partition, Arc::new(policy), metastore, kms, aead, secret_factory, sk_cache)
    }

    #[test]
    fn round_trip_basic() {
        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let partition = DefaultPartition::new("user42", "service", "product");
        let engine = test_engine(policy, partition);

        let drr = engine.encrypt_payload(b"hello").unwrap();
        assert_eq!(drr.key.parent_key_meta.as_ref().unwrap().id, "_IK_user42_service_product");

        let plaintext = engine.decrypt(&drr).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn cross_partition_rejected() {
        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let metastore: Arc<dyn Metastore> = Arc::new(InMemoryMetastore::new());
        let kms: Arc<dyn KeyManagementService> =
            Arc::new(StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec()));
        let aead: Arc<dyn Aead> = Arc::new(crate::crypto::Aes256GcmAead);
        let secret_factory: Arc<dyn SecretFactory> = Arc::new(NativeSecretFactory);
        let sk_cache = Arc::new(AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
            1000,
            policy.key_expiration.as_secs() as i64,
            policy.revoke_check_period.as_secs() as i64,
        )));

        let partition_a = DefaultPartition::new("tenant-a", "service", "product");
        let engine_a = EnvelopeEngine::new(
            &partition_a,
            Arc::new(policy.clone()),
            Arc::clone(&metastore),
            Arc::clone(&kms),
            Arc::clone(&aead),
            Arc::clone(&secret_factory),
            Arc::clone(&sk_cache),
        );
        let drr = engine_a.encrypt_payload(b"tenant a secret").unwrap();

        let partition_b = DefaultPartition::new("tenant-b", "service", "product");
        let engine_b = EnvelopeEngine::new(
            &partition_b,
            Arc::new(policy),
            metastore,
            kms,
            aead,
            secret_factory,
            sk_cache,
        );

        let err = engine_b.decrypt(&drr).unwrap_err();
        assert!(matches!(err, Error::PartitionMismatch { .. }));
    }

    #[test]
    fn concurrent_encrypt_across_engines_stays_decryptable() {
        use std::thread;

        let policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        let metastore: Arc<dyn Metastore> = Arc::new(InMemoryMetastore::new());
        let kms: Arc<dyn KeyManagementService> =
            Arc::new(StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec()));
        let aead: Arc<dyn Aead> = Arc::new(crate::crypto::Aes256GcmAead);
        let secret_factory: Arc<dyn SecretFactory> = Arc::new(NativeSecretFactory);
        let sk_cache = Arc::new(AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
            1000,
            policy.key_expiration.as_secs() as i64,
            policy.revoke_check_period.as_secs() as i64,
        )));
        let partition = DefaultPartition::new("user1", "service", "product");

        let engines: Vec<_> = (0..8)
            .map(|_| {
                Arc::new(EnvelopeEngine::new(
                    &partition,
                    Arc::new(policy.clone()),
                    Arc::clone(&metastore),
                    Arc::clone(&kms),
                    Arc::clone(&aead),
                    Arc::clone(&secret_factory),
                    Arc::clone(&sk_cache),
                ))
            })
            .collect();

        let handles: Vec<_> = engines
            .into_iter()
            .enumerate()
            .map(|(i, engine)| thread::spawn(move || engine.encrypt_payload(format!("payload-{i}").as_bytes())))
            .collect();

        let drrs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        for (i, drr) in drrs.iter().enumerate() {
            let decrypted = EnvelopeEngine::new(
                &DefaultPartition::new("user1", "service", "product"),
                Arc::new(policy.clone()),
                Arc::clone(&metastore),
                Arc::clone(&kms),
                Arc::clone(&aead),
                Arc::clone(&secret_factory),
                Arc::clone(&sk_cache),
            )
            .decrypt(drr)
            .unwrap();
            assert_eq!(decrypted, format!("payload-{i}").as_bytes());
        }
    }

    #[test]
    fn expired_key_triggers_rotation_on_next_write() {
        let mut policy = CryptoPolicy::new(Duration::from_secs(0), Duration::from_secs(3600));
        policy.intermediate_key_precision = Duration::from_secs(1);
        let partition = DefaultPartition::new("user42", "service", "product");
        let engine = test_engine(policy, partition);

        let first = engine.encrypt_payload(b"a").unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        let second = engine.encrypt_payload(b"b").unwrap();

        assert!(
            second.key.parent_key_meta.unwrap().created >= first.key.parent_key_meta.unwrap().created
        );
    }

    /// Wraps an [`InMemoryMetastore`] that reports the system key row as
    /// revoked once armed, while leaving intermediate key rows untouched.
    struct SkRevokingMetastore {
        inner: InMemoryMetastore,
        sk_id: String,
        revoke: std::sync::atomic::AtomicBool,
    }

    impl SkRevokingMetastore {
        fn maybe_revoke(&self, id: &str, mut ekr: Option<EnvelopeKeyRecord>) -> Option<EnvelopeKeyRecord> {
            if id == self.sk_id && self.revoke.load(std::sync::atomic::Ordering::Acquire) {
                if let Some(ekr) = ekr.as_mut() {
                    ekr.revoked = Some(true);
                }
            }
            ekr
        }
    }

    impl Metastore for SkRevokingMetastore {
        fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
            let ekr = self.inner.load(id, created)?;
            Ok(self.maybe_revoke(id, ekr))
        }

        fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
            let ekr = self.inner.load_latest(id)?;
            Ok(self.maybe_revoke(id, ekr))
        }

        fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
            self.inner.store(id, created, record)
        }
    }

    #[test]
    fn stale_parent_system_key_forces_ik_rotation_instead_of_reuse() {
        let mut policy = CryptoPolicy::new(Duration::from_secs(90 * 24 * 3600), Duration::from_secs(3600));
        policy.cache_intermediate_keys = false;
        policy.intermediate_key_precision = Duration::from_secs(1);
        let partition = DefaultPartition::new("user42", "service", "product");

        let metastore = Arc::new(SkRevokingMetastore {
            inner: InMemoryMetastore::new(),
            sk_id: partition.system_key_id().to_string(),
            revoke: std::sync::atomic::AtomicBool::new(false),
        });
        let metastore_dyn: Arc<dyn Metastore> = metastore.clone();
        let kms: Arc<dyn KeyManagementService> =
            Arc::new(StaticKeyManagementService::new(b"thisIsAStaticMasterKeyForTesting".to_vec()));
        let aead: Arc<dyn Aead> = Arc::new(crate::crypto::Aes256GcmAead);
        let secret_factory: Arc<dyn SecretFactory> = Arc::new(NativeSecretFactory);
        let sk_cache = Arc::new(AnyKeyCache::Cached(crate::key::cache::KeyCache::new(
            1000,
            policy.key_expiration.as_secs() as i64,
            policy.revoke_check_period.as_secs() as i64,
        )));

        let engine = EnvelopeEngine::new(
            &partition,
            Arc::new(policy),
            metastore_dyn,
            kms,
            aead,
            secret_factory,
            sk_cache,
        );

        let first = engine.encrypt_payload(b"a").unwrap();
        let first_ik_created = first.key.parent_key_meta.unwrap().created;

        metastore.revoke.store(true, std::sync::atomic::Ordering::Release);
        std::thread::sleep(Duration::from_millis(1100));

        let second = engine.encrypt_payload(b"b").unwrap();
        let second_ik_created = second.key.parent_key_meta.clone().unwrap().created;

        // a still-valid IK must not be reused once its parent SK is
        // revoked: the engine has to rotate to a freshly created IK.
        assert!(second_ik_created > first_ik_created);
        assert_eq!(engine.decrypt(&second).unwrap(), b"b");
    }
}
