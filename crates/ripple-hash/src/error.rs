//! Error types for ripple-hash.

use ripple_core::EntityRef;
use ripple_db::error::DatabaseError;
use thiserror::Error;

fn render_path(path: &[EntityRef]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Entity {entity} declares no hashable attributes")]
    NoHashableAttributes { entity: EntityRef },

    /// The recursion path that closed the cycle, ending at the repeated entity.
    #[error("Cyclic dependency: {}", render_path(.path))]
    CyclicDependency { path: Vec<EntityRef> },

    #[error("No entity source registered for type '{0}'")]
    UnknownEntityType(String),

    #[error("Entity {entity} has no relation '{relation}'")]
    UnknownRelation { entity: EntityRef, relation: String },

    #[error("Entity {0} not found in its source")]
    EntityNotFound(EntityRef),

    #[error("Entity source error: {0}")]
    Source(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_renders_path() {
        let err = HashError::CyclicDependency {
            path: vec![
                EntityRef::new("a", "1"),
                EntityRef::new("b", "2"),
                EntityRef::new("a", "1"),
            ],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a:1 -> b:2 -> a:1");
    }
}
