use aes_gcm::aead::{Aead as AeadTrait, KeyInit};
use aes_gcm::{Aes256Gcm, Key as AesKey, Nonce};

use super::{fill_random, Aead, GCM_KEY_SIZE, GCM_MAX_DATA_SIZE, GCM_NONCE_SIZE, GCM_TAG_SIZE};
use crate::error::{Error, Result};

/// AES-256-GCM, with the nonce appended after the ciphertext and tag
/// rather than prefixed, per the wire contract in the external
/// interfaces section.
#[derive(Default, Debug, Clone, Copy)]
pub struct Aes256GcmAead;

impl Aead for Aes256GcmAead {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if key.len() != GCM_KEY_SIZE {
            return Err(Error::CryptoFailure(format!(
                "invalid key width: expected {GCM_KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        if plaintext.len() > GCM_MAX_DATA_SIZE {
            return Err(Error::CryptoFailure("plaintext too large for GCM".into()));
        }

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));

        let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
        fill_random(&mut nonce_bytes)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::CryptoFailure(format!("encryption failed: {e}")))?;

        ciphertext.extend_from_slice(&nonce_bytes);
        Ok(ciphertext)
    }

    fn decrypt(&self, sealed: &[u8], key: &[u8]) -> Result<Vec<u8>> {
        if key.len() != GCM_KEY_SIZE {
            return Err(Error::CryptoFailure(format!(
                "invalid key width: expected {GCM_KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        if sealed.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
            return Err(Error::CryptoFailure(
                "sealed data too short for nonce and tag".into(),
            ));
        }

        let split = sealed.len() - GCM_NONCE_SIZE;
        let (ciphertext, nonce_bytes) = sealed.split_at(split);
        let nonce = Nonce::from_slice(nonce_bytes);

        let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key));
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::CryptoFailure(format!("decryption failed: {e}")))
    }
}
