//! [`CryptoKey`]: a timestamped, revocable handle wrapping a [`Secret`].

pub mod cache;

use std::sync::atomic::{AtomicBool, Ordering};

use keyforge_securemem::{Secret, SecretExt, SecretFactory};

use crate::error::Result;

/// A `(secret, created, revoked)` tuple. Immutable apart from the
/// monotonic `revoked := true` transition and the terminal `close`.
pub struct CryptoKey {
    secret: Box<dyn Secret>,
    created: i64,
    revoked: AtomicBool,
}

impl CryptoKey {
    pub fn from_secret(secret: Box<dyn Secret>, created: i64) -> Self {
        CryptoKey {
            secret,
            created,
            revoked: AtomicBool::new(false),
        }
    }

    pub fn generate(factory: &dyn SecretFactory, len: usize, created: i64) -> Result<Self> {
        Ok(CryptoKey::from_secret(factory.create_random(len)?, created))
    }

    /// Builds a key from bytes the caller owns; the caller remains
    /// responsible for wiping its own copy after this returns.
    pub fn from_bytes(factory: &dyn SecretFactory, bytes: &[u8], created: i64) -> Result<Self> {
        Ok(CryptoKey::from_secret(factory.create_from(bytes)?, created))
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.secret.is_closed()
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        Ok(self.secret.with_bytes(f)?)
    }

    pub fn close(&self) -> Result<()> {
        Ok(self.secret.close()?)
    }
}

impl Drop for CryptoKey {
    fn drop(&mut self) {
        if let Err(e) = self.secret.close() {
            log::error!("failed to close crypto key secret on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyforge_securemem::NativeSecretFactory;

    #[test]
    fn revoke_is_visible_and_monotonic() {
        let factory = NativeSecretFactory;
        let key = CryptoKey::generate(&factory, 32, 100).unwrap();
        assert!(!key.is_revoked());
        key.revoke();
        assert!(key.is_revoked());
    }

    #[test]
    fn from_bytes_preserves_plaintext() {
        let factory = NativeSecretFactory;
        let key = CryptoKey::from_bytes(&factory, &[7u8; 32], 50).unwrap();
        assert_eq!(key.with_bytes(|b| b.to_vec()).unwrap(), vec![7u8; 32]);
    }

    #[test]
    fn close_is_idempotent_and_rejects_access() {
        let factory = NativeSecretFactory;
        let key = CryptoKey::generate(&factory, 32, 1).unwrap();
        key.close().unwrap();
        key.close().unwrap();
        assert!(key.is_closed());
        assert!(key.with_bytes(|_| ()).is_err());
    }
}
