//! # ripple-core
//!
//! Core types shared across all Ripple crates:
//! - Entity addressing (`EntityRef`) for arbitrary tracked entity types
//! - Persisted records: hash records, dependency links, delivery tasks, targets, leases
//! - Delivery status enum with its state machine
//! - Error kinds and dispositions used by the publish pipeline
//! - ID prefix constants

pub mod entities;
pub mod entity_ref;
pub mod enums;
pub mod errors;
pub mod ids;

pub use entity_ref::EntityRef;
