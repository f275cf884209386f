//! Error types for ripple-publish.

use std::time::Duration;

use ripple_core::enums::ErrorKind;
use ripple_db::error::DatabaseError;
use ripple_hash::HashError;
use thiserror::Error;

/// Errors that end a scheduler run.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error("Scheduler lease '{key}' was lost to another owner")]
    LeaseLost { key: String },

    #[error("Scheduler run exceeded its {0:?} timeout")]
    Timeout(Duration),

    #[error("Scheduler run panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by a delivery contract while publishing one task.
///
/// Never escapes the scheduler: each error is classified into an
/// [`ErrorKind`] and settled on the task.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The target rejected the payload.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        response_code: Option<u16>,
    },

    /// The transport failed; classified by `response_code` when present.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        response_code: Option<u16>,
    },

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Source data needed for the payload is missing or empty.
    #[error("Missing data: {0}")]
    MissingData(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeliveryError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Transport {
                response_code: Some(code),
                ..
            } => classify_status(*code),
            Self::Transport { .. } | Self::Timeout(_) | Self::Unauthorized(_) => {
                ErrorKind::Infrastructure
            }
            Self::MissingData(_) => ErrorKind::Data,
            Self::Other(_) => ErrorKind::Unknown,
        }
    }

    #[must_use]
    pub const fn response_code(&self) -> Option<u16> {
        match self {
            Self::Validation { response_code, .. } | Self::Transport { response_code, .. } => {
                *response_code
            }
            _ => None,
        }
    }
}

/// Map an HTTP status code to an error kind.
///
/// 404/410 mean the remote has no such resource (data); 401/403/408/429 and
/// 5xx are transient or credential problems (infrastructure); any other 4xx
/// is a rejected payload (validation).
#[must_use]
pub const fn classify_status(code: u16) -> ErrorKind {
    match code {
        404 | 410 => ErrorKind::Data,
        401 | 403 | 408 | 429 | 500..=599 => ErrorKind::Infrastructure,
        400..=499 => ErrorKind::Validation,
        _ => ErrorKind::Unknown,
    }
}
