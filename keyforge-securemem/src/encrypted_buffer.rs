//! Software-only secret engine for platforms without usable
//! mmap/mprotect/mlock primitives.
//!
//! Plaintext is never stored at rest: each secret is kept encrypted under
//! a per-process ephemeral AES-256-GCM key generated once at first use.
//! `with_bytes` decrypts into a throwaway buffer for the duration of the
//! callback and zeroizes it immediately after, which gives the same
//! wipe-on-close and no-access-between-uses guarantees as the native
//! engine without needing OS-level page protection.

use std::sync::RwLock;

use aes_gcm::aead::{Aead as _, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use once_cell::sync::Lazy;
use zeroize::Zeroize;

use crate::error::{Result, SecureMemoryError};
use crate::secret::{Secret, SecretFactory};

const NONCE_SIZE: usize = 12;

static PROCESS_CIPHER: Lazy<Aes256Gcm> = Lazy::new(|| {
    let mut key = [0u8; 32];
    getrandom::getrandom(&mut key).expect("platform RNG unavailable for process secret key");
    let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is always valid for AES-256");
    key.zeroize();
    cipher
});

fn seal(plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    getrandom::getrandom(&mut nonce_bytes)
        .map_err(|e| SecureMemoryError::RandomGenerationFailed(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = PROCESS_CIPHER
        .encrypt(nonce, plaintext)
        .map_err(|e| SecureMemoryError::OperationFailed(format!("seal failed: {e}")))?;

    let mut out = nonce_bytes.to_vec();
    out.append(&mut ciphertext);
    Ok(out)
}

fn open(sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(SecureMemoryError::OperationFailed(
            "sealed buffer shorter than nonce".to_string(),
        ));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    PROCESS_CIPHER
        .decrypt(nonce, ciphertext)
        .map_err(|e| SecureMemoryError::OperationFailed(format!("open failed: {e}")))
}

/// A [`Secret`] whose contents are encrypted at rest under a process-wide
/// ephemeral key rather than protected by OS page permissions.
pub struct EncryptedBufferSecret {
    len: usize,
    sealed: RwLock<Option<Vec<u8>>>,
}

impl EncryptedBufferSecret {
    fn from_plaintext(mut plaintext: Vec<u8>) -> Result<Self> {
        let len = plaintext.len();
        let sealed = seal(&plaintext);
        plaintext.zeroize();
        Ok(EncryptedBufferSecret {
            len,
            sealed: RwLock::new(Some(sealed?)),
        })
    }
}

impl Secret for EncryptedBufferSecret {
    fn len(&self) -> usize {
        self.len
    }

    fn is_closed(&self) -> bool {
        self.sealed.read().unwrap_or_else(|e| e.into_inner()).is_none()
    }

    fn with_bytes_dyn(&self, f: &mut dyn FnMut(&[u8])) -> Result<()> {
        let guard = self.sealed.read().unwrap_or_else(|e| e.into_inner());
        let sealed = guard.as_ref().ok_or(SecureMemoryError::SecretClosed)?;
        let mut plaintext = open(sealed)?;
        f(&plaintext);
        plaintext.zeroize();
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.sealed.write().unwrap_or_else(|e| e.into_inner());
        if let Some(mut sealed) = guard.take() {
            sealed.zeroize();
        }
        Ok(())
    }
}

impl Drop for EncryptedBufferSecret {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("failed to close encrypted-buffer secret on drop: {e}");
        }
    }
}

/// Builds [`EncryptedBufferSecret`] instances, the fallback secure-heap
/// engine for platforms lacking lockable, protection-guarded memory.
#[derive(Debug, Default)]
pub struct EncryptedBufferSecretFactory;

impl SecretFactory for EncryptedBufferSecretFactory {
    fn create_random(&self, len: usize) -> Result<Box<dyn Secret>> {
        if len == 0 {
            return Err(SecureMemoryError::InvalidSize(
                "secret length must be non-zero".to_string(),
            ));
        }
        let mut plaintext = vec![0u8; len];
        getrandom::getrandom(&mut plaintext)
            .map_err(|e| SecureMemoryError::RandomGenerationFailed(e.to_string()))?;
        Ok(Box::new(EncryptedBufferSecret::from_plaintext(plaintext)?))
    }

    fn create_from(&self, bytes: &[u8]) -> Result<Box<dyn Secret>> {
        if bytes.is_empty() {
            return Err(SecureMemoryError::InvalidSize(
                "secret length must be non-zero".to_string(),
            ));
        }
        Ok(Box::new(EncryptedBufferSecret::from_plaintext(
            bytes.to_vec(),
        )?))
    }

    fn with_bytes_mut_into_dyn(
        &self,
        len: usize,
        f: Box<dyn FnOnce(&mut [u8]) -> Result<()> + '_>,
    ) -> Result<Box<dyn Secret>> {
        if len == 0 {
            return Err(SecureMemoryError::InvalidSize(
                "secret length must be non-zero".to_string(),
            ));
        }
        let mut plaintext = vec![0u8; len];
        f(&mut plaintext)?;
        Ok(Box::new(EncryptedBufferSecret::from_plaintext(plaintext)?))
    }
}
