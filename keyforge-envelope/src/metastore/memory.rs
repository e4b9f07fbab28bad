use std::collections::HashMap;
use std::sync::RwLock;

use crate::envelope::EnvelopeKeyRecord;
use crate::error::Result;
use crate::metastore::Metastore;

/// An in-memory [`Metastore`]. Keys are lost when the process exits;
/// useful for tests and local development, not for production.
#[derive(Default)]
pub struct InMemoryMetastore {
    store: RwLock<HashMap<String, HashMap<i64, EnvelopeKeyRecord>>>,
}

impl InMemoryMetastore {
    pub fn new() -> Self {
        InMemoryMetastore::default()
    }
}

impl Metastore for InMemoryMetastore {
    fn load(&self, id: &str, created: i64) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(store.get(id).and_then(|by_created| by_created.get(&created)).cloned())
    }

    fn load_latest(&self, id: &str) -> Result<Option<EnvelopeKeyRecord>> {
        let store = self.store.read().unwrap_or_else(|e| e.into_inner());
        Ok(store
            .get(id)
            .and_then(|by_created| by_created.iter().max_by_key(|(created, _)| **created))
            .map(|(_, record)| record.clone()))
    }

    fn store(&self, id: &str, created: i64, record: &EnvelopeKeyRecord) -> Result<bool> {
        let mut store = self.store.write().unwrap_or_else(|e| e.into_inner());
        let by_created = store.entry(id.to_string()).or_default();
        if by_created.contains_key(&created) {
            return Ok(false);
        }
        by_created.insert(created, record.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EnvelopeKeyRecord;

    fn sk_record(created: i64) -> EnvelopeKeyRecord {
        EnvelopeKeyRecord {
            created,
            encrypted_key: vec![1, 2, 3],
            parent_key_meta: None,
            revoked: None,
        }
    }

    #[test]
    fn store_is_idempotent_on_duplicate_created() {
        let store = InMemoryMetastore::new();
        assert!(store.store("_SK_a_b", 100, &sk_record(100)).unwrap());
        assert!(!store.store("_SK_a_b", 100, &sk_record(100)).unwrap());
    }

    #[test]
    fn load_latest_picks_highest_created() {
        let store = InMemoryMetastore::new();
        store.store("_SK_a_b", 100, &sk_record(100)).unwrap();
        store.store("_SK_a_b", 200, &sk_record(200)).unwrap();
        store.store("_SK_a_b", 150, &sk_record(150)).unwrap();
        assert_eq!(store.load_latest("_SK_a_b").unwrap().unwrap().created, 200);
    }

    #[test]
    fn load_missing_returns_none() {
        let store = InMemoryMetastore::new();
        assert!(store.load("nope", 1).unwrap().is_none());
        assert!(store.load_latest("nope").unwrap().is_none());
    }
}
