use crate::crypto::{Aead, Aes256GcmAead};
use crate::error::Result;
use crate::kms::KeyManagementService;

/// A fixed-master-key KMS for tests and local development. Not a
/// production root of trust: the master key lives in process memory
/// as a plain byte vector rather than behind a hardware or cloud
/// boundary.
pub struct StaticKeyManagementService {
    master_key: Vec<u8>,
    aead: Aes256GcmAead,
}

impl StaticKeyManagementService {
    pub fn new(master_key: Vec<u8>) -> Self {
        StaticKeyManagementService {
            master_key,
            aead: Aes256GcmAead,
        }
    }
}

impl KeyManagementService for StaticKeyManagementService {
    fn encrypt_key(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.aead.encrypt(plaintext, &self.master_key)
    }

    fn decrypt_key(&self, opaque: &[u8]) -> Result<Vec<u8>> {
        self.aead.decrypt(opaque, &self.master_key)
    }
}
