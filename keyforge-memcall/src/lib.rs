//! Minimal cross-platform wrapper around the OS primitives that a secure
//! allocator needs: anonymous memory mapping, page protection, locking
//! pages out of swap, and disabling core dumps.
//!
//! Every public function here is a thin, fallible shim over a single
//! syscall family. Higher-level allocation policy (alignment, guard pages,
//! zeroing on free) lives in `keyforge-securemem`, not here.

mod error;
mod types;

#[cfg(unix)]
#[path = "unix.rs"]
mod imp;

#[cfg(windows)]
#[path = "windows.rs"]
mod imp;

#[cfg(not(any(unix, windows)))]
compile_error!("keyforge-memcall has no implementation for this target platform");

pub use error::MemcallError;
pub use types::{MemoryProtection, RlimitResource};

/// Maps a new anonymous, zeroed region of `size` bytes.
///
/// The returned slice is backed by OS-owned memory, not the Rust
/// allocator; it must be released with [`free`], not dropped.
pub fn alloc(size: usize) -> Result<&'static mut [u8], MemcallError> {
    if size == 0 {
        return Err(MemcallError::InvalidArgument(
            "alloc size must be non-zero".to_string(),
        ));
    }
    imp::alloc(size)
}

/// Unmaps a region previously returned by [`alloc`], zeroing it first.
pub fn free(ptr: &mut [u8]) -> Result<(), MemcallError> {
    imp::free(ptr)
}

/// Changes the protection of a mapped region.
pub fn protect(ptr: &mut [u8], protection: MemoryProtection) -> Result<(), MemcallError> {
    imp::protect(ptr, protection)
}

/// Locks a region so the OS will not swap it to disk.
pub fn lock(ptr: &mut [u8]) -> Result<(), MemcallError> {
    imp::lock(ptr)
}

/// Reverses [`lock`], allowing the region to be swapped again.
pub fn unlock(ptr: &mut [u8]) -> Result<(), MemcallError> {
    imp::unlock(ptr)
}

/// Returns the OS page size in bytes.
pub fn page_size() -> usize {
    imp::page_size()
}

/// Best-effort: prevents the process from writing core dumps that could
/// leak secrets onto disk. A no-op on platforms without the concept.
pub fn disable_core_dumps() -> Result<(), MemcallError> {
    imp::disable_core_dumps()
}

/// Sets a process resource limit (e.g. `RLIMIT_MEMLOCK`) to `value`.
pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemcallError> {
    imp::set_limit(resource, value)
}

/// Maps a region whose start address is aligned to `align` bytes by
/// over-allocating and trimming. `align` must be a power of two no larger
/// than the page size, since alignment finer than a page is meaningless
/// for `mprotect`/`mlock`, which always operate on whole pages.
pub fn allocate_aligned(size: usize, align: usize) -> Result<&'static mut [u8], MemcallError> {
    if align == 0 || !align.is_power_of_two() {
        return Err(MemcallError::InvalidArgument(format!(
            "alignment must be a power of two, got {align}"
        )));
    }

    let page = page_size();
    if align > page {
        return Err(MemcallError::InvalidArgument(format!(
            "alignment {align} exceeds page size {page}"
        )));
    }

    // mmap/VirtualAlloc already return page-aligned addresses, and `align`
    // can never exceed the page size, so the plain allocation already
    // satisfies the request.
    alloc(size)
}

/// Releases a region returned by [`allocate_aligned`].
pub fn free_aligned(ptr: &mut [u8]) -> Result<(), MemcallError> {
    free(ptr)
}
