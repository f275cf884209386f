//! Delivery task outcome builder.

use chrono::{DateTime, Utc};
use serde::Serialize;

use ripple_core::enums::{DeliveryStatus, ErrorKind};

/// Fields written when a dispatched task settles.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcomeUpdate {
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_hash: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response_code: Option<Option<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<Option<ErrorKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Option<serde_json::Value>>,
}

pub struct TaskOutcomeUpdateBuilder(TaskOutcomeUpdate);

impl TaskOutcomeUpdateBuilder {
    #[must_use]
    pub const fn new(status: DeliveryStatus) -> Self {
        Self(TaskOutcomeUpdate {
            status,
            delivered_hash: None,
            delivered_at: None,
            last_error: None,
            last_response_code: None,
            error_kind: None,
            next_attempt_at: None,
            metadata: None,
        })
    }

    #[must_use]
    pub fn delivered_hash(mut self, hash: Option<String>) -> Self {
        self.0.delivered_hash = Some(hash);
        self
    }

    #[must_use]
    pub fn delivered_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.0.delivered_at = Some(at);
        self
    }

    #[must_use]
    pub fn last_error(mut self, error: Option<String>) -> Self {
        self.0.last_error = Some(error);
        self
    }

    #[must_use]
    pub fn last_response_code(mut self, code: Option<u16>) -> Self {
        self.0.last_response_code = Some(code);
        self
    }

    #[must_use]
    pub fn error_kind(mut self, kind: Option<ErrorKind>) -> Self {
        self.0.error_kind = Some(kind);
        self
    }

    #[must_use]
    pub fn next_attempt_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.0.next_attempt_at = Some(at);
        self
    }

    #[must_use]
    pub fn metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.0.metadata = Some(metadata);
        self
    }

    /// Clear the error columns left by earlier attempts.
    #[must_use]
    pub fn clear_error(self) -> Self {
        self.last_error(None)
            .last_response_code(None)
            .error_kind(None)
            .next_attempt_at(None)
    }

    #[must_use]
    pub fn build(self) -> TaskOutcomeUpdate {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_only_touched_fields() {
        let update = TaskOutcomeUpdateBuilder::new(DeliveryStatus::Deferred)
            .last_error(Some("timeout".into()))
            .error_kind(Some(ErrorKind::Infrastructure))
            .build();
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "deferred",
                "last_error": "timeout",
                "error_kind": "infrastructure",
            })
        );
    }

    #[test]
    fn clear_error_writes_nulls() {
        let update = TaskOutcomeUpdateBuilder::new(DeliveryStatus::Published)
            .clear_error()
            .build();
        assert_eq!(update.last_error, Some(None));
        assert_eq!(update.error_kind, Some(None));
        assert_eq!(update.next_attempt_at, Some(None));
        assert!(update.metadata.is_none());
    }
}
