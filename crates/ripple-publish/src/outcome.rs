//! Settled results of one delivery attempt.

use chrono::{DateTime, Utc};
use ripple_core::enums::{DeliveryStatus, ErrorKind};
use ripple_db::updates::delivery::{TaskOutcomeUpdate, TaskOutcomeUpdateBuilder};
use serde_json::json;

use crate::error::DeliveryError;

/// Error details recorded on a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub response_code: Option<u16>,
}

impl DeliveryFailure {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            response_code: None,
        }
    }
}

impl From<&DeliveryError> for DeliveryFailure {
    fn from(error: &DeliveryError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            response_code: error.response_code(),
        }
    }
}

/// How a dispatched task was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Delivered; carries the effective hash that was published.
    Success { hash: String },
    /// `should_publish` declined the task.
    Skipped,
    /// The hash record or its entity is gone.
    SourceDeleted,
    Deferred {
        failure: DeliveryFailure,
        retry_at: DateTime<Utc>,
    },
    Failed(DeliveryFailure),
    /// The contract asked to stop the target's run. The task itself is
    /// deferred, or failed when `retry_at` is `None`.
    StopRun {
        failure: DeliveryFailure,
        retry_at: Option<DateTime<Utc>>,
    },
}

impl TaskOutcome {
    #[must_use]
    pub const fn status(&self) -> DeliveryStatus {
        match self {
            Self::Success { .. } | Self::Skipped => DeliveryStatus::Published,
            Self::SourceDeleted => DeliveryStatus::SourceDeleted,
            Self::Deferred { .. } | Self::StopRun { retry_at: Some(_), .. } => {
                DeliveryStatus::Deferred
            }
            Self::Failed(_) | Self::StopRun { retry_at: None, .. } => DeliveryStatus::Failed,
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&DeliveryFailure> {
        match self {
            Self::Deferred { failure, .. } | Self::Failed(failure) | Self::StopRun { failure, .. } => {
                Some(failure)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn stops_run(&self) -> bool {
        matches!(self, Self::StopRun { .. })
    }

    /// Column writes for settling the task at `now`.
    #[must_use]
    pub fn to_update(&self, now: DateTime<Utc>) -> TaskOutcomeUpdate {
        let builder = TaskOutcomeUpdateBuilder::new(self.status());
        match self {
            Self::Success { hash } => builder
                .clear_error()
                .delivered_hash(Some(hash.clone()))
                .delivered_at(Some(now))
                .metadata(None),
            Self::Skipped => builder
                .clear_error()
                .metadata(Some(json!({ "skipped": true }))),
            Self::SourceDeleted => builder.clear_error(),
            Self::Deferred { failure, retry_at } => {
                with_failure(builder, failure).next_attempt_at(Some(*retry_at))
            }
            Self::Failed(failure) => with_failure(builder, failure).next_attempt_at(None),
            Self::StopRun { failure, retry_at } => {
                with_failure(builder, failure).next_attempt_at(*retry_at)
            }
        }
        .build()
    }
}

fn with_failure(builder: TaskOutcomeUpdateBuilder, failure: &DeliveryFailure) -> TaskOutcomeUpdateBuilder {
    builder
        .last_error(Some(failure.message.clone()))
        .last_response_code(failure.response_code)
        .error_kind(Some(failure.kind))
}
