use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::TargetStatus;

/// An external system that receives change notifications for one entity type.
///
/// Delivery policy (batch size, retry table, error budgets) comes from the
/// `DeliveryContract` registered under `name`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub config: Option<serde_json::Value>,
    pub status: TargetStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryTarget {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TargetStatus::Active
    }
}
