use thiserror::Error;

/// Errors surfaced by the platform memory syscall wrappers.
#[derive(Error, Debug)]
pub enum MemcallError {
    /// The underlying OS call returned a failure status.
    #[error("system operation failed: {0}")]
    SystemError(String),

    /// A memory-protection syscall (`mprotect`/`VirtualProtect`) failed.
    #[error("memory protection change failed: {0}")]
    ProtectionError(String),

    /// The caller passed an argument the platform layer cannot honor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested operation has no implementation on this platform.
    #[error("operation not supported on this platform: {0}")]
    NotSupported(String),

    /// A resource limit (e.g. RLIMIT_MEMLOCK) was exceeded.
    #[error("resource limit reached: {0}")]
    ResourceLimit(String),
}
