//! SK → IK → DRK envelope encryption: a bounded, TTL- and
//! revocation-aware key hierarchy over a pluggable metastore and KMS,
//! with a JSON wire format shared across language implementations.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod key;
pub mod kms;
pub mod metastore;
pub mod partition;
pub mod policy;
pub mod session;
mod util;

pub use crypto::{Aead, Aes256GcmAead};
pub use envelope::{DataRowRecord, EnvelopeEngine, EnvelopeKeyRecord, KeyMeta};
pub use error::{Error, Result};
pub use key::cache::{AnyKeyCache, CacheHandle, KeyCache, Loader, Reloader};
pub use key::CryptoKey;
pub use kms::{KeyManagementService, StaticKeyManagementService};
pub use metastore::{InMemoryMetastore, Metastore};
pub use partition::{DefaultPartition, Partition};
pub use policy::{CryptoEngine, CryptoPolicy, RotationStrategy};
pub use session::{Persistence, Session, SessionFactory};

pub use keyforge_securemem::{
    EncryptedBufferSecretFactory, NativeSecretFactory, Secret, SecretExt, SecretFactory,
    SecretFactoryExt, SecureHeapEngine, SecureMemoryError,
};
