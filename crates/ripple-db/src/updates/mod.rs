//! Update builder types for record mutations.
//!
//! Each builder produces an update struct with `Option` fields. Only `Some` fields
//! generate SET clauses in the dynamic UPDATE SQL; `Some(None)` writes NULL.

pub mod delivery;
