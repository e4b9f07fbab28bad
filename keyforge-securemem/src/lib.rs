//! Secure heap for short-lived plaintext key material.
//!
//! A [`Secret`] is a fixed-length byte region that is never readable at
//! rest: callers get access only inside a [`Secret::with_bytes`] scope,
//! and [`Secret::close`] wipes the contents. Two engines implement this
//! contract: [`native`], which relies on mmap/mprotect/mlock, and
//! [`encrypted_buffer`], a software fallback that encrypts contents at
//! rest under a per-process key. [`factory::build_factory`] selects
//! between them once per process from a configured engine name.

mod encrypted_buffer;
mod error;
mod factory;
mod native;
mod secret;

pub use encrypted_buffer::EncryptedBufferSecretFactory;
pub use error::{Result, SecureMemoryError};
pub use factory::{build_factory, SecureHeapEngine};
pub use native::NativeSecretFactory;
pub use secret::{Secret, SecretExt, SecretFactory, SecretFactoryExt};
