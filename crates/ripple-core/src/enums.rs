//! Status enums, error kinds, and dispositions for Ripple.
//!
//! All enums use `snake_case` serialization via `#[serde(rename_all = "snake_case")]`,
//! which is also the representation stored in SQL.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// DeliveryStatus
// ---------------------------------------------------------------------------

/// Status of a delivery task.
///
/// ```text
/// pending → dispatched → published
///                      → deferred → dispatched (once next_attempt_at elapses)
///                      → failed
///                      → source_deleted
///                      → pending (stale dispatch reconciled)
/// ```
///
/// Re-enqueueing after a hash change and operator requeue bypass this table;
/// see [`DeliveryStatus::can_requeue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Dispatched,
    Deferred,
    Published,
    Failed,
    SourceDeleted,
}

impl DeliveryStatus {
    /// Valid next states from the current state.
    #[must_use]
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Pending | Self::Deferred => &[Self::Dispatched],
            Self::Dispatched => &[
                Self::Published,
                Self::Deferred,
                Self::Failed,
                Self::SourceDeleted,
                Self::Pending,
            ],
            Self::Published | Self::Failed | Self::SourceDeleted => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Published | Self::Failed | Self::SourceDeleted)
    }

    /// Terminal tasks may be put back into the queue by an operator.
    #[must_use]
    pub const fn can_requeue(self) -> bool {
        self.is_terminal()
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Deferred => "deferred",
            Self::Published => "published",
            Self::Failed => "failed",
            Self::SourceDeleted => "source_deleted",
        }
    }

    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Dispatched,
        Self::Deferred,
        Self::Published,
        Self::Failed,
        Self::SourceDeleted,
    ];
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Classification of a delivery failure.
///
/// `Unknown` is handled like `Infrastructure`: retried, and counted against
/// the infrastructure error budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unacceptable payload. Not retried.
    Validation,
    /// Transport, auth, or timeout failure. Retried.
    Infrastructure,
    /// Missing, empty, or not-found source data. Not retried.
    Data,
    /// Unclassified.
    Unknown,
}

impl ErrorKind {
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Infrastructure | Self::Unknown)
    }

    #[must_use]
    pub const fn counts_toward_infrastructure(self) -> bool {
        matches!(self, Self::Infrastructure | Self::Unknown)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Infrastructure => "infrastructure",
            Self::Data => "data",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Disposition
// ---------------------------------------------------------------------------

/// What a delivery target wants done with a task whose delivery raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Abort the rest of this run for the target.
    StopJob,
    /// Retry later according to the retry-interval table.
    DeferRecord,
    /// Give up on this task.
    FailRecord,
}

impl Disposition {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopJob => "stop_job",
            Self::DeferRecord => "defer_record",
            Self::FailRecord => "fail_record",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TargetStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Active,
    Inactive,
}

impl TargetStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(DeliveryStatus::Pending, DeliveryStatus::Dispatched)]
    #[case(DeliveryStatus::Deferred, DeliveryStatus::Dispatched)]
    #[case(DeliveryStatus::Dispatched, DeliveryStatus::Published)]
    #[case(DeliveryStatus::Dispatched, DeliveryStatus::Deferred)]
    #[case(DeliveryStatus::Dispatched, DeliveryStatus::Failed)]
    #[case(DeliveryStatus::Dispatched, DeliveryStatus::SourceDeleted)]
    #[case(DeliveryStatus::Dispatched, DeliveryStatus::Pending)]
    fn delivery_valid_transitions(#[case] from: DeliveryStatus, #[case] to: DeliveryStatus) {
        assert!(from.can_transition_to(to), "{from} -> {to} should be allowed");
    }

    #[rstest]
    #[case(DeliveryStatus::Pending, DeliveryStatus::Published)]
    #[case(DeliveryStatus::Deferred, DeliveryStatus::Published)]
    #[case(DeliveryStatus::Published, DeliveryStatus::Dispatched)]
    #[case(DeliveryStatus::Failed, DeliveryStatus::Pending)]
    fn delivery_invalid_transitions(#[case] from: DeliveryStatus, #[case] to: DeliveryStatus) {
        assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
    }

    #[test]
    fn delivery_terminal_states() {
        for status in DeliveryStatus::ALL {
            assert_eq!(
                status.is_terminal(),
                status.allowed_next_states().is_empty(),
                "{status}"
            );
        }
        assert!(DeliveryStatus::Failed.can_requeue());
        assert!(!DeliveryStatus::Deferred.can_requeue());
    }

    #[test]
    fn unknown_errors_behave_like_infrastructure() {
        assert!(ErrorKind::Unknown.is_retryable());
        assert!(ErrorKind::Unknown.counts_toward_infrastructure());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Data.counts_toward_infrastructure());
    }

    #[test]
    fn serde_matches_as_str() {
        for status in DeliveryStatus::ALL {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, serde_json::Value::String(status.as_str().into()));
        }
        assert_eq!(
            serde_json::to_value(Disposition::StopJob).unwrap(),
            serde_json::json!("stop_job")
        );
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(format!("{}", DeliveryStatus::SourceDeleted), "source_deleted");
        assert_eq!(format!("{}", ErrorKind::Infrastructure), "infrastructure");
        assert_eq!(format!("{}", Disposition::DeferRecord), "defer_record");
        assert_eq!(format!("{}", TargetStatus::Inactive), "inactive");
    }
}
