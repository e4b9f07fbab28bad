/// Requested protection level for a memory region.
///
/// Discriminants are explicit so that a platform layer can match on the
/// numeric value directly when that is more convenient than the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MemoryProtection {
    /// Memory cannot be read, written, or executed.
    NoAccess = 1,
    /// Memory can be read but not written or executed.
    ReadOnly = 2,
    /// Memory can be read and written but not executed.
    ReadWrite = 6,
}

impl From<MemoryProtection> for u32 {
    fn from(prot: MemoryProtection) -> u32 {
        prot as u32
    }
}

/// Resource limit identifiers accepted by [`crate::set_limit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RlimitResource {
    /// Maximum size of the process's data segment.
    Data,
    /// Maximum size of a generated core file.
    Core,
    /// Maximum amount of memory that may be locked into RAM.
    MemLock,
    /// Maximum number of open file descriptors.
    NoFile,
    /// Maximum size of the process's stack segment.
    Stack,
}
