use thiserror::Error;

/// Errors raised by the secure-memory layer.
#[derive(Error, Debug)]
pub enum SecureMemoryError {
    #[error("failed to allocate secure memory: {0}")]
    AllocationFailed(String),

    #[error("failed to lock memory pages: {0}")]
    MemoryLockFailed(String),

    #[error("failed to change memory protection: {0}")]
    ProtectionFailed(String),

    #[error("failed to unlock memory pages: {0}")]
    MemoryUnlockFailed(String),

    #[error("failed to release secure memory: {0}")]
    DeallocationFailed(String),

    #[error("operation attempted on a closed secret")]
    SecretClosed,

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("attempted write to a read-only secret")]
    ReadOnlyMemory,

    #[error("random generation failed: {0}")]
    RandomGenerationFailed(String),

    #[error("unknown secure heap engine: {0}")]
    UnknownEngine(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl From<keyforge_memcall::MemcallError> for SecureMemoryError {
    fn from(err: keyforge_memcall::MemcallError) -> Self {
        use keyforge_memcall::MemcallError;
        match err {
            MemcallError::SystemError(msg) => SecureMemoryError::AllocationFailed(msg),
            MemcallError::ProtectionError(msg) => SecureMemoryError::ProtectionFailed(msg),
            MemcallError::InvalidArgument(msg) => SecureMemoryError::InvalidSize(msg),
            MemcallError::NotSupported(msg) => SecureMemoryError::OperationFailed(msg),
            MemcallError::ResourceLimit(msg) => SecureMemoryError::MemoryLockFailed(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SecureMemoryError>;
