//! Canonical System Key and Intermediate Key identifiers for a logical
//! isolation unit.

/// Derives the SK and IK ids for a `(product, service, partition_id)`
/// triple and validates that an IK id on a record belongs to this
/// partition before it is trusted.
pub trait Partition: Send + Sync {
    fn system_key_id(&self) -> &str;
    fn intermediate_key_id(&self) -> &str;

    /// Whether `ik_id` may be treated as this partition's IK id.
    fn is_valid_intermediate_key_id(&self, ik_id: &str) -> bool {
        ik_id == self.intermediate_key_id()
    }
}

/// The standard partition: `_SK_<service>_<product>` /
/// `_IK_<partition>_<service>_<product>`.
#[derive(Debug, Clone)]
pub struct DefaultPartition {
    system_key_id: String,
    intermediate_key_id: String,
}

impl DefaultPartition {
    pub fn new(partition_id: &str, service: &str, product: &str) -> Self {
        DefaultPartition {
            system_key_id: format!("_SK_{service}_{product}"),
            intermediate_key_id: format!("_IK_{partition_id}_{service}_{product}"),
        }
    }
}

impl Partition for DefaultPartition {
    fn system_key_id(&self) -> &str {
        &self.system_key_id
    }

    fn intermediate_key_id(&self) -> &str {
        &self.intermediate_key_id
    }
}
