//! Errors raised by the hash store, the delivery queue, and the lease table.

use std::time::Duration;

use ripple_core::enums::DeliveryStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed or returned unparseable data.
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// A delivery task was asked to move along an edge the state machine
    /// does not have. Nothing was written.
    #[error("invalid delivery transition: {from} -> {to}")]
    InvalidTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    /// A task or record changed underneath a multi-step operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The lease TTL does not fit a timestamp offset.
    #[error("lease ttl out of range: {0:?}")]
    InvalidLeaseTtl(Duration),

    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
