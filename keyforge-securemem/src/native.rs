//! Secret engine backed by locked, mprotect-guarded OS pages.
//!
//! A region is allocated with [`keyforge_memcall::alloc`], locked into RAM
//! with [`keyforge_memcall::lock`] so it cannot be swapped, and held at
//! [`MemoryProtection::NoAccess`] whenever no caller is inside `with_bytes`.
//! Concurrent readers share access: the region is only re-protected to
//! no-access once the last of them exits.
//!
//! `mlock` failure (typically `RLIMIT_MEMLOCK` exhaustion) fails the
//! allocation outright. The `no-mlock` feature skips `lock`/`unlock`
//! entirely for sandboxes that refuse to grant the rlimit; never enable
//! it in production, since secrets can then be swapped to disk.

use std::sync::{Arc, Condvar, Mutex};

use keyforge_memcall::MemoryProtection;
use zeroize::Zeroize;

use crate::error::{Result, SecureMemoryError};
use crate::secret::{Secret, SecretFactory};

struct Region {
    mem: &'static mut [u8],
}

// SAFETY: access to `mem` is always mediated by `Inner::state`, which
// guarantees at most one protection transition runs at a time and that no
// reader observes bytes after `closed` is set.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

struct State {
    closed: bool,
    readers: usize,
}

struct Inner {
    region: Mutex<Option<Region>>,
    len: usize,
    state: Mutex<State>,
    cond: Condvar,
}

impl Inner {
    fn access(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            return Err(SecureMemoryError::SecretClosed);
        }
        if state.readers == 0 {
            let mut region = self.region.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(region) = region.as_mut() {
                keyforge_memcall::protect(region.mem, MemoryProtection::ReadOnly)?;
            }
        }
        state.readers += 1;
        Ok(())
    }

    fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.readers -= 1;
        if state.readers == 0 && !state.closed {
            let mut region = self.region.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(region) = region.as_mut() {
                let _ = keyforge_memcall::protect(region.mem, MemoryProtection::NoAccess);
            }
        }
        self.cond.notify_all();
    }

    fn close_impl(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while state.readers > 0 {
            state = self.cond.wait(state).unwrap_or_else(|e| e.into_inner());
        }
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        let mut region = self.region.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(r) = region.take() {
            keyforge_memcall::protect(r.mem, MemoryProtection::ReadWrite)?;
            r.mem.zeroize();
            #[cfg(not(feature = "no-mlock"))]
            let _ = keyforge_memcall::unlock(r.mem);
            keyforge_memcall::free(r.mem)?;
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Err(e) = self.close_impl() {
            log::error!("failed to close secure region on drop: {e}");
        }
    }
}

/// A [`Secret`] backed by locked, protection-guarded OS pages.
pub struct NativeSecret {
    inner: Arc<Inner>,
}

impl NativeSecret {
    fn allocate(len: usize) -> Result<(Arc<Inner>, &'static mut [u8])> {
        if len == 0 {
            return Err(SecureMemoryError::InvalidSize(
                "secret length must be non-zero".to_string(),
            ));
        }

        let mem = keyforge_memcall::alloc(len)?;
        #[cfg(not(feature = "no-mlock"))]
        if let Err(e) = keyforge_memcall::lock(mem) {
            let _ = keyforge_memcall::free(mem);
            return Err(e.into());
        }

        // SAFETY: we hand one slice to the caller to fill and a second
        // view of the same bytes into the region for protection control;
        // the caller's writes happen before the region is ever read back
        // through `with_bytes`, which only runs after this function returns.
        let ptr = mem.as_mut_ptr();
        let caller_view = unsafe { std::slice::from_raw_parts_mut(ptr, len) };

        let inner = Arc::new(Inner {
            region: Mutex::new(Some(Region { mem })),
            len,
            state: Mutex::new(State {
                closed: false,
                readers: 0,
            }),
            cond: Condvar::new(),
        });

        Ok((inner, caller_view))
    }
}

impl Secret for NativeSecret {
    fn len(&self) -> usize {
        self.inner.len
    }

    fn is_closed(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .closed
    }

    fn with_bytes_dyn(&self, f: &mut dyn FnMut(&[u8])) -> Result<()> {
        self.inner.access()?;
        let result = {
            let region = self.inner.region.lock().unwrap_or_else(|e| e.into_inner());
            match region.as_ref() {
                Some(r) => {
                    f(r.mem);
                    Ok(())
                }
                None => Err(SecureMemoryError::SecretClosed),
            }
        };
        self.inner.release();
        result
    }

    fn close(&self) -> Result<()> {
        self.inner.close_impl()
    }
}

/// Builds [`NativeSecret`] instances, the secure-heap engine used on
/// platforms with working mmap/mprotect/mlock primitives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeSecretFactory;

impl SecretFactory for NativeSecretFactory {
    fn create_random(&self, len: usize) -> Result<Box<dyn Secret>> {
        let (inner, caller_view) = NativeSecret::allocate(len)?;
        if let Err(e) = crate::secret::fill_random(caller_view) {
            // best-effort: the region is freed via Inner::drop regardless
            let _ = Inner::close_impl(&inner);
            return Err(e);
        }
        Ok(Box::new(NativeSecret { inner }))
    }

    fn create_from(&self, bytes: &[u8]) -> Result<Box<dyn Secret>> {
        let (inner, caller_view) = NativeSecret::allocate(bytes.len())?;
        caller_view.copy_from_slice(bytes);
        Ok(Box::new(NativeSecret { inner }))
    }

    fn with_bytes_mut_into_dyn(
        &self,
        len: usize,
        f: Box<dyn FnOnce(&mut [u8]) -> Result<()> + '_>,
    ) -> Result<Box<dyn Secret>> {
        let (inner, caller_view) = NativeSecret::allocate(len)?;
        if let Err(e) = f(caller_view) {
            let _ = Inner::close_impl(&inner);
            return Err(e);
        }
        Ok(Box::new(NativeSecret { inner }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{SecretExt, SecretFactoryExt};

    #[test]
    fn round_trips_plaintext() {
        let factory = NativeSecretFactory;
        let secret = factory.create_from(b"top secret key bytes").unwrap();
        let copy = secret.with_bytes(|b| b.to_vec()).unwrap();
        assert_eq!(copy, b"top secret key bytes");
    }

    #[test]
    fn close_rejects_further_access() {
        let factory = NativeSecretFactory;
        let secret = factory.create_random(32).unwrap();
        secret.close().unwrap();
        assert!(secret.is_closed());
        assert!(secret.with_bytes(|_| ()).is_err());
        // idempotent
        secret.close().unwrap();
    }

    #[test]
    fn concurrent_readers_share_access() {
        use std::thread;

        let factory = NativeSecretFactory;
        let secret = Arc::new(factory.create_from(&[7u8; 64]).unwrap());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let secret = Arc::clone(&secret);
            handles.push(thread::spawn(move || {
                secret.with_bytes(|b| assert_eq!(b, &[7u8; 64])).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn with_bytes_mut_into_derives_secret() {
        let factory = NativeSecretFactory;
        let secret = factory
            .with_bytes_mut_into(4, |buf| {
                buf.copy_from_slice(&[1, 2, 3, 4]);
                Ok(())
            })
            .unwrap();
        assert_eq!(secret.with_bytes(|b| b.to_vec()).unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn rejects_zero_length() {
        let factory = NativeSecretFactory;
        assert!(factory.create_random(0).is_err());
    }
}
