//! Repository modules for the Ripple tables.
//!
//! Each module adds methods to `RippleService` via `impl RippleService` blocks.

pub mod delivery;
pub mod hash;
pub mod lease;
pub mod link;
pub mod target;
