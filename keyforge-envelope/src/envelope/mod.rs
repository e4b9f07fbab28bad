//! Wire types for the key hierarchy: [`KeyMeta`], [`EnvelopeKeyRecord`]
//! (the on-metastore shape of a wrapped key), and [`DataRowRecord`] (the
//! output of `encrypt`). JSON field names and a base64 encoding for key
//! material are fixed by the cross-language wire contract.

pub mod engine;

use serde::{Deserialize, Serialize};

pub use engine::EnvelopeEngine;

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// `(id, created)` — the lookup key into the metastore and the cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KeyMeta {
    #[serde(rename = "KeyId")]
    pub id: String,
    #[serde(rename = "Created")]
    pub created: i64,
}

impl KeyMeta {
    pub fn new(id: impl Into<String>, created: i64) -> Self {
        KeyMeta { id: id.into(), created }
    }

    /// `created == 0` is the sentinel for "give me whatever is latest".
    pub fn is_latest(&self) -> bool {
        self.created == 0
    }

    pub fn as_latest(&self) -> KeyMeta {
        KeyMeta { id: self.id.clone(), created: 0 }
    }
}

/// The on-metastore shape of a wrapped key.
///
/// `parent_key_meta` is present iff the key is an IK (wrapped by an SK);
/// an SK's record has none, since it was wrapped by the external KMS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopeKeyRecord {
    #[serde(rename = "Created")]
    pub created: i64,
    #[serde(rename = "Key", with = "base64_bytes")]
    pub encrypted_key: Vec<u8>,
    #[serde(rename = "ParentKeyMeta", skip_serializing_if = "Option::is_none", default)]
    pub parent_key_meta: Option<KeyMeta>,
    #[serde(rename = "Revoked", skip_serializing_if = "Option::is_none", default)]
    pub revoked: Option<bool>,
}

impl EnvelopeKeyRecord {
    /// A missing `revoked` field means not revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked.unwrap_or(false)
    }
}

/// The output of `encrypt`: a wrapped, single-use Data Row Key plus the
/// ciphertext it protects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRowRecord {
    #[serde(rename = "Key")]
    pub key: EnvelopeKeyRecord,
    #[serde(rename = "Data", with = "base64_bytes")]
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ekr_round_trips_through_json_with_base64_key() {
        let ekr = EnvelopeKeyRecord {
            created: 1_700_000_000,
            encrypted_key: vec![1, 2, 3, 4, 5],
            parent_key_meta: Some(KeyMeta::new("_SK_service_product", 1_699_999_940)),
            revoked: None,
        };
        let json = serde_json::to_value(&ekr).unwrap();
        assert_eq!(json["Created"], 1_700_000_000);
        assert!(json["Key"].is_string());
        assert_eq!(json["ParentKeyMeta"]["KeyId"], "_SK_service_product");
        assert!(json.get("Revoked").is_none());

        let decoded: EnvelopeKeyRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, ekr);
    }

    #[test]
    fn revoked_true_is_serialized_explicitly() {
        let ekr = EnvelopeKeyRecord {
            created: 1,
            encrypted_key: vec![0],
            parent_key_meta: None,
            revoked: Some(true),
        };
        let json = serde_json::to_value(&ekr).unwrap();
        assert_eq!(json["Revoked"], true);
        assert!(json.get("ParentKeyMeta").is_none());
    }

    #[test]
    fn missing_revoked_field_means_not_revoked() {
        let json = serde_json::json!({"Created": 1, "Key": "AAAA"});
        let ekr: EnvelopeKeyRecord = serde_json::from_value(json).unwrap();
        assert!(!ekr.is_revoked());
    }
}
