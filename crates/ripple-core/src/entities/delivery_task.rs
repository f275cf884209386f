use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::{DeliveryStatus, ErrorKind};

/// Unit of work: notify one delivery target of one hash record's current state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct DeliveryTask {
    pub id: String,
    /// `None` marks an unrecoverable missing hash.
    pub hash_id: Option<String>,
    pub target_id: String,
    /// Effective hash value last attempted.
    pub delivered_hash: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_response_code: Option<u16>,
    pub error_kind: Option<ErrorKind>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryTask {
    /// Whether the scheduler may pick this task up at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            DeliveryStatus::Pending => true,
            DeliveryStatus::Deferred => self.next_attempt_at.is_none_or(|at| at <= now),
            _ => false,
        }
    }
}
