use crate::error::MemcallError;
use crate::types::{MemoryProtection, RlimitResource};
use std::ptr;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, VirtualFree, VirtualLock, VirtualProtect, VirtualUnlock, MEM_COMMIT, MEM_RELEASE,
    MEM_RESERVE, PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

#[inline]
fn as_ptr_void(memory: &mut [u8]) -> *mut std::ffi::c_void {
    if memory.is_empty() {
        ptr::null_mut()
    } else {
        memory.as_mut_ptr().cast::<std::ffi::c_void>()
    }
}

pub fn alloc(size: usize) -> Result<&'static mut [u8], MemcallError> {
    let ptr = unsafe {
        VirtualAlloc(
            ptr::null_mut(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        )
    };

    if ptr.is_null() {
        return Err(MemcallError::SystemError(format!(
            "VirtualAlloc failed: {}",
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

    let result = unsafe { VirtualFree(as_ptr_void(ptr), 0, MEM_RELEASE) };
    if result == 0 {
        return Err(MemcallError::SystemError(format!(
            "VirtualFree failed at {:p}: {}",
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
        MemoryProtection::NoAccess => PAGE_NOACCESS,
        MemoryProtection::ReadOnly => PAGE_READONLY,
        MemoryProtection::ReadWrite => PAGE_READWRITE,
    };

    let mut old_protect: u32 = 0;
    let len = ptr.len();
    let result = unsafe { VirtualProtect(as_ptr_void(ptr), len, prot, &mut old_protect) };
    if result == 0 {
        return Err(MemcallError::ProtectionError(format!(
            "VirtualProtect({}) failed at {:p}: {}",
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

    let len = ptr.len();
    let result = unsafe { VirtualLock(as_ptr_void(ptr), len) };
    if result == 0 {
        return Err(MemcallError::ResourceLimit(format!(
            "VirtualLock failed at {:p}: {}",
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

    let len = ptr.len();
    let result = unsafe { VirtualUnlock(as_ptr_void(ptr), len) };
    if result == 0 {
        return Err(MemcallError::SystemError(format!(
            "VirtualUnlock failed at {:p}: {}",
            ptr.as_ptr(),
            std::io::Error::last_os_error()
        )));
    }

    Ok(())
}

pub fn page_size() -> usize {
    unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info.dwPageSize as usize
    }
}

pub fn disable_core_dumps() -> Result<(), MemcallError> {
    // Windows has no core-dump rlimit equivalent; WER minidumps are configured
    // separately and out of scope for this process-local knob.
    Ok(())
}

pub fn set_limit(_resource: RlimitResource, _value: u64) -> Result<(), MemcallError> {
    Err(MemcallError::NotSupported(
        "set_limit is not supported on Windows".to_string(),
    ))
}
