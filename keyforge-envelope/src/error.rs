use thiserror::Error;

/// Errors surfaced by the key hierarchy and envelope encryption engine.
///
/// Every variant is fatal to the in-flight operation. The sole recovery
/// path built into the engine itself is the documented duplicate-write
/// retry during SK/IK creation; everything else propagates unmodified.
#[derive(Error, Debug)]
pub enum Error {
    /// Unknown engine name or a missing required policy field, detected
    /// at factory/engine construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("secure memory allocation failed: {0}")]
    SecureMemoryAllocationFailed(#[source] keyforge_securemem::SecureMemoryError),

    #[error("secure memory protection failed: {0}")]
    SecureMemoryProtection(#[source] keyforge_securemem::SecureMemoryError),

    #[error("memory limit exceeded: {0}")]
    MemoryLimit(#[source] keyforge_securemem::SecureMemoryError),

    /// `load`/`load_latest` returned nothing where a key was required.
    #[error("required key metadata missing: {0}")]
    MetadataMissing(String),

    /// A DRR referenced an IK id belonging to a different partition.
    #[error("data row record belongs to a different partition: expected {expected}, found {found}")]
    PartitionMismatch { expected: String, found: String },

    #[error("KMS operation failed: {0}")]
    KmsFailure(String),

    #[error("metastore operation failed: {0}")]
    MetastoreFailure(String),

    /// AEAD tag mismatch, corrupted ciphertext, or invalid key width.
    #[error("cryptographic operation failed: {0}")]
    CryptoFailure(String),

    /// Operation attempted on a closed Secret/Session/Factory.
    #[error("operation attempted on an already-closed resource")]
    AlreadyClosed,

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<keyforge_securemem::SecureMemoryError> for Error {
    fn from(err: keyforge_securemem::SecureMemoryError) -> Self {
        use keyforge_securemem::SecureMemoryError;
        match err {
            SecureMemoryError::AllocationFailed(_) => Error::SecureMemoryAllocationFailed(err),
            SecureMemoryError::ProtectionFailed(_) | SecureMemoryError::ReadOnlyMemory => {
                Error::SecureMemoryProtection(err)
            }
            SecureMemoryError::MemoryLockFailed(_) | SecureMemoryError::MemoryUnlockFailed(_) => {
                Error::MemoryLimit(err)
            }
            SecureMemoryError::SecretClosed => Error::AlreadyClosed,
            other => Error::SecureMemoryAllocationFailed(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
