use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity_ref::EntityRef;

/// Current fingerprint state of one tracked entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct HashRecord {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub attribute_hash: String,
    /// `None` when the entity declares no dependencies.
    pub composite_hash: Option<String>,
    /// Set when a dependency changed and this record awaits recomputation.
    pub invalidated_at: Option<DateTime<Utc>>,
    pub tombstoned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HashRecord {
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(&self.entity_type, &self.entity_id)
    }

    /// The hash downstream consumers compare against: the composite hash if the
    /// entity has dependencies, otherwise the attribute hash.
    #[must_use]
    pub fn effective_hash(&self) -> &str {
        self.composite_hash.as_deref().unwrap_or(&self.attribute_hash)
    }

    #[must_use]
    pub const fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }
}
