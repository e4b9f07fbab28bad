//! Durable store of wrapped key records, indexed by `(id, created)`.
//!
//! Only [`InMemoryMetastore`] ships here; durable backends (SQL,
//! wide-column) are pluggable collaborators implementing this trait.

mod memory;

pub use memory::InMemoryMetastore;

use crate::envelope::EnvelopeKeyRecord;
use crate::error::Result;

/// Append-only store of wrapped SK/IK records.
///
/// `load_latest` must return records for a given `id` in strictly
/// decreasing `created` order — callers only ever need the single
/// highest one. `store` is idempotent: the first call for a given
/// `(id, created)` returns `true`; every later call with that same pair
/// returns `false` rather than overwriting.
pub trait Metastore: Send + Sync {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>>;
    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>>;
    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool>;
}
