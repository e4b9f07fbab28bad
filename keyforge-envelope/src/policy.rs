use std::time::Duration;

/// Which direction an IK rotation takes when a stale record is observed
/// on a write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Rotate synchronously, on the writer that observed staleness.
    Inline,
    /// Use the stale-but-decryptable key for the current write and hand
    /// rotation to a background worker.
    Queued,
}

impl Default for RotationStrategy {
    fn default() -> Self {
        RotationStrategy::Inline
    }
}

impl RotationStrategy {
    pub fn parse(name: &str) -> crate::error::Result<Self> {
        match name {
            "inline" => Ok(RotationStrategy::Inline),
            "queued" => Ok(RotationStrategy::Queued),
            other => Err(crate::error::Error::Configuration(format!(
                "unknown rotation strategy: {other}"
            ))),
        }
    }
}

/// The AEAD construction used for envelope and payload encryption.
/// Only one is specified; the field exists so the construction is a
/// documented, explicit choice rather than implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CryptoEngine {
    #[default]
    Aes256Gcm,
}

/// Key expiry, cache eligibility, rotation, and precision knobs that
/// govern the key hierarchy engine. Two fields are required (no sane
/// default exists); everything else has one.
#[derive(Debug, Clone)]
pub struct CryptoPolicy {
    pub key_expiration: Duration,
    pub revoke_check_period: Duration,

    pub rotation_strategy: RotationStrategy,

    pub cache_system_keys: bool,
    pub cache_intermediate_keys: bool,
    pub system_key_cache_max_size: usize,
    pub intermediate_key_cache_max_size: usize,

    pub cache_sessions: bool,
    pub session_cache_max_size: u32,
    pub session_cache_expire: Duration,

    pub notify_expired_sk_read: bool,
    pub notify_expired_ik_read: bool,

    pub system_key_precision: Duration,
    pub intermediate_key_precision: Duration,

    pub crypto_engine: CryptoEngine,
    pub secure_heap_engine: keyforge_securemem::SecureHeapEngine,
}

impl CryptoPolicy {
    /// Builds a policy with the two required durations and every other
    /// field at its documented default.
    pub fn new(key_expiration: Duration, revoke_check_period: Duration) -> Self {
        CryptoPolicy {
            key_expiration,
            revoke_check_period,
            rotation_strategy: RotationStrategy::default(),
            cache_system_keys: true,
            cache_intermediate_keys: true,
            system_key_cache_max_size: 1000,
            intermediate_key_cache_max_size: 1000,
            cache_sessions: false,
            session_cache_max_size: 1000,
            session_cache_expire: Duration::from_secs(2 * 60),
            notify_expired_sk_read: false,
            notify_expired_ik_read: false,
            system_key_precision: Duration::from_secs(60),
            intermediate_key_precision: Duration::from_secs(60),
            crypto_engine: CryptoEngine::default(),
            secure_heap_engine: keyforge_securemem::SecureHeapEngine::platform_default(),
        }
    }

    pub fn with_rotation_strategy(mut self, s: RotationStrategy) -> Self {
        self.rotation_strategy = s;
        self
    }

    pub fn with_cache_sessions(mut self, enabled: bool) -> Self {
        self.cache_sessions = enabled;
        self
    }

    pub fn with_secure_heap_engine(mut self, engine: keyforge_securemem::SecureHeapEngine) -> Self {
        self.secure_heap_engine = engine;
        self
    }

    /// `now - created > key_expiration`.
    pub fn is_key_expired(&self, created: i64, now: i64) -> bool {
        now - created > self.key_expiration.as_secs() as i64
    }

    /// Truncates a unix-seconds timestamp down to a precision bucket.
    pub fn truncate_to_precision(now: i64, precision: Duration) -> i64 {
        let bucket = precision.as_secs().max(1) as i64;
        now - (now % bucket)
    }
}
