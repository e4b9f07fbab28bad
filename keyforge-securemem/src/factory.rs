use std::sync::Once;

use crate::encrypted_buffer::EncryptedBufferSecretFactory;
use crate::error::{Result, SecureMemoryError};
use crate::native::NativeSecretFactory;
use crate::secret::SecretFactory;

static DISABLE_CORE_DUMPS_ONCE: Once = Once::new();

/// Which secure-heap engine backs [`SecretFactory`] instances.
///
/// Chosen once per process from a configured name; an unrecognized name
/// is a configuration error, not a silent fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecureHeapEngine {
    /// Locked, mprotect-guarded OS pages. Requires mmap/mprotect/mlock.
    Native,
    /// Encrypt-at-rest software fallback for platforms lacking those
    /// primitives.
    EncryptedBuffer,
}

impl SecureHeapEngine {
    /// Parses the engine name used in configuration (`"native"` or
    /// `"encrypted-buffer"`). Fails fast on anything else.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "native" => Ok(SecureHeapEngine::Native),
            "encrypted-buffer" => Ok(SecureHeapEngine::EncryptedBuffer),
            other => Err(SecureMemoryError::UnknownEngine(other.to_string())),
        }
    }

    /// The engine this platform is expected to support well.
    pub fn platform_default() -> Self {
        if cfg!(any(unix, windows)) {
            SecureHeapEngine::Native
        } else {
            SecureHeapEngine::EncryptedBuffer
        }
    }
}

/// Builds the process's [`SecretFactory`] for the selected engine.
///
/// For [`SecureHeapEngine::Native`] this also disables core dumps for the
/// process, once, the first time a native factory is requested.
pub fn build_factory(engine: SecureHeapEngine) -> Result<Box<dyn SecretFactory>> {
    match engine {
        SecureHeapEngine::Native => {
            DISABLE_CORE_DUMPS_ONCE.call_once(|| {
                if let Err(e) = keyforge_memcall::disable_core_dumps() {
                    log::warn!("failed to disable core dumps: {e}");
                }
            });
            Ok(Box::new(NativeSecretFactory))
        }
        SecureHeapEngine::EncryptedBuffer => Ok(Box::new(EncryptedBufferSecretFactory)),
    }
}
