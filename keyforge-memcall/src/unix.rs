use crate::error::MemcallError;
use crate::types::{MemoryProtection, RlimitResource};
use once_cell::sync::Lazy;
use std::ptr;

static PAGE_SIZE: Lazy<usize> = Lazy::new(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize });

#[inline]
fn as_mut_ptr(memory: &mut [u8]) -> *mut libc::c_void {
    memory.as_mut_ptr() as *mut libc::c_void
}

#[inline]
fn as_len(memory: &[u8]) -> libc::size_t {
    memory.len() as libc::size_t
}

pub fn alloc(size: usize) -> Result<&'static mut [u8], MemcallError> {
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        )
    };

    if ptr == libc::MAP_FAILED {
        return Err(MemcallError::SystemError(format!(
            "mmap failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let memory = unsafe { std::slice::from_raw_parts_mut(ptr.cast::<u8>(), size) };
    memory.fill(0);
    Ok(memory)
}

pub fn free(ptr: &mut [u8]) -> Result<(), MemcallError> {
    if ptr.is_empty() {
        return Ok(());
    }

    protect(ptr, MemoryProtection::ReadWrite)?;
    ptr.fill(0);

    let result = unsafe { libc::munmap(as_mut_ptr(ptr), as_len(ptr)) };
    if result != 0 {
        return Err(MemcallError::SystemError(format!(
            "munmap failed at {:p}: {}",
            ptr.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn protect(ptr: &mut [u8], protection: MemoryProtection) -> Result<(), MemcallError> {
    if ptr.is_empty() {
        return Ok(());
    }

    let prot = match protection {
        MemoryProtection::NoAccess => libc::PROT_NONE,
        MemoryProtection::ReadOnly => libc::PROT_READ,
        MemoryProtection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };

    let result = unsafe { libc::mprotect(as_mut_ptr(ptr), as_len(ptr), prot) };
    if result != 0 {
        return Err(MemcallError::ProtectionError(format!(
            "mprotect({}) failed at {:p}: {}",
            prot,
            ptr.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn lock(ptr: &mut [u8]) -> Result<(), MemcallError> {
    if ptr.is_empty() {
        return Ok(());
    }

    #[cfg(target_os = "linux")]
    unsafe {
        libc::madvise(as_mut_ptr(ptr), as_len(ptr), libc::MADV_DONTDUMP);
    }

    let result = unsafe { libc::mlock(as_mut_ptr(ptr), as_len(ptr)) };
    if result != 0 {
        return Err(MemcallError::ResourceLimit(format!(
            "mlock failed at {:p}, memlock rlimit reached?: {}",
            ptr.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn unlock(ptr: &mut [u8]) -> Result<(), MemcallError> {
    if ptr.is_empty() {
        return Ok(());
    }

    let result = unsafe { libc::munlock(as_mut_ptr(ptr), as_len(ptr)) };
    if result != 0 {
        return Err(MemcallError::SystemError(format!(
            "munlock failed at {:p}: {}",
            ptr.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn page_size() -> usize {
    *PAGE_SIZE
}

pub fn disable_core_dumps() -> Result<(), MemcallError> {
    let rlimit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    let result = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &rlimit) };
    if result != 0 {
        return Err(MemcallError::SystemError(format!(
            "setrlimit(RLIMIT_CORE) failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn set_limit(resource: RlimitResource, value: u64) -> Result<(), MemcallError> {
    let resource_id = match resource {
        RlimitResource::Core => libc::RLIMIT_CORE,
        RlimitResource::Data => libc::RLIMIT_DATA,
        RlimitResource::MemLock => libc::RLIMIT_MEMLOCK,
        RlimitResource::NoFile => libc::RLIMIT_NOFILE,
        RlimitResource::Stack => libc::RLIMIT_STACK,
    };

    let rlimit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };

    let result = unsafe { libc::setrlimit(resource_id, &rlimit) };
    if result != 0 {
        return Err(MemcallError::SystemError(format!(
            "setrlimit failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}
