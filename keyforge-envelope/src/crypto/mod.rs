//! Authenticated encryption primitive used to wrap keys and payloads.

mod aes256gcm;

pub use aes256gcm::Aes256GcmAead;

use crate::error::Result;

pub(crate) const GCM_NONCE_SIZE: usize = 12;
pub(crate) const GCM_TAG_SIZE: usize = 16;
pub(crate) const GCM_KEY_SIZE: usize = 32;

// ((1 << 32) - 2) * block_size, the GCM ciphertext length limit.
pub(crate) const GCM_MAX_DATA_SIZE: usize = ((1_usize << 32) - 2) * 16;

/// Authenticated encryption under a fixed-width key.
///
/// `encrypt` generates a fresh nonce per call and appends it to the
/// returned buffer as the trailing `nonce_width/8` bytes, after the
/// ciphertext and tag. `decrypt` expects the same layout.
pub trait Aead: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, sealed: &[u8], key: &[u8]) -> Result<Vec<u8>>;
}

pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf)
        .map_err(|e| crate::error::Error::CryptoFailure(format!("RNG unavailable: {e}")))
}
