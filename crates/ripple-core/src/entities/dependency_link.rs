use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::entity_ref::EntityRef;

/// A live edge feeding a hash record's composite hash.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DependencyLink {
    pub id: String,
    pub hash_id: String,
    pub dependent_type: String,
    pub dependent_id: String,
    /// Relation path from the owning entity, dot-separated for nested relations.
    pub relation_name: String,
}

impl DependencyLink {
    #[must_use]
    pub fn dependent_ref(&self) -> EntityRef {
        EntityRef::new(&self.dependent_type, &self.dependent_id)
    }
}

/// A dependency edge produced by composite hashing, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NewDependencyLink {
    pub relation_name: String,
    pub dependent: EntityRef,
}
