//! Cross-cutting error types for Ripple.
//!
//! Domain-specific errors (`DatabaseError`, `HashError`, `PublishError`) live in
//! their respective crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// An entity reference string could not be parsed.
    #[error("Invalid entity reference '{0}' (expected 'type:id')")]
    InvalidEntityRef(String),

    /// A state machine transition was attempted that is not allowed.
    #[error("Invalid state transition: {entity_type} {id} from {from} to {to}")]
    InvalidTransition {
        entity_type: String,
        id: String,
        from: String,
        to: String,
    },

    /// A string did not match any known variant.
    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
