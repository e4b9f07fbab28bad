use crate::error::{Result, SecureMemoryError};

/// A fixed-length region of plaintext key bytes that is inaccessible at
/// rest and wiped on close.
///
/// `with_bytes` is the only way to read the contents: the region is
/// protected for the duration of the call and returned to no-access
/// immediately after, as the last concurrent reader exits (I1-I3 in the
/// secret lifecycle: a closed secret rejects access, bytes never escape
/// the callback's scope, and concurrent readers share access safely).
pub trait Secret: Send + Sync {
    /// Length of the protected region in bytes.
    fn len(&self) -> usize;

    /// Whether the region has length zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`close`](Secret::close) has already run.
    fn is_closed(&self) -> bool;

    /// Object-safe core of `with_bytes`: invokes `f` once with the
    /// plaintext while the region is protection-readable.
    fn with_bytes_dyn(&self, f: &mut dyn FnMut(&[u8])) -> Result<()>;

    /// Zeroes the region and releases its backing allocation. Idempotent.
    fn close(&self) -> Result<()>;
}

/// Ergonomic, generic-returning wrapper around [`Secret::with_bytes_dyn`].
pub trait SecretExt: Secret {
    fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let mut out = None;
        let mut f = Some(f);
        self.with_bytes_dyn(&mut |bytes| {
            if let Some(f) = f.take() {
                out = Some(f(bytes));
            }
        })?;
        out.ok_or_else(|| {
            SecureMemoryError::OperationFailed("with_bytes closure did not run".to_string())
        })
    }
}

impl<T: Secret + ?Sized> SecretExt for T {}

/// Produces [`Secret`] instances using whichever secure-heap engine was
/// selected for the process.
pub trait SecretFactory: Send + Sync {
    /// Allocates a new secret filled from a cryptographically strong RNG.
    fn create_random(&self, len: usize) -> Result<Box<dyn Secret>>;

    /// Allocates a new secret and copies `bytes` into it. The caller
    /// remains responsible for wiping its own copy of `bytes`.
    fn create_from(&self, bytes: &[u8]) -> Result<Box<dyn Secret>>;

    /// Object-safe core of `with_bytes_mut_into`: allocates `len` bytes,
    /// hands write access to `f`, then locks the region down.
    fn with_bytes_mut_into_dyn(
        &self,
        len: usize,
        f: Box<dyn FnOnce(&mut [u8]) -> Result<()> + '_>,
    ) -> Result<Box<dyn Secret>>;
}

/// Ergonomic, generic-closure wrapper around [`SecretFactory::with_bytes_mut_into_dyn`].
pub trait SecretFactoryExt: SecretFactory {
    fn with_bytes_mut_into<F>(&self, len: usize, f: F) -> Result<Box<dyn Secret>>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        self.with_bytes_mut_into_dyn(len, Box::new(f))
    }
}

impl<T: SecretFactory + ?Sized> SecretFactoryExt for T {}

pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf)
        .map_err(|e| SecureMemoryError::RandomGenerationFailed(e.to_string()))
}
