//! The capability contract of a tracked entity.

use ripple_core::EntityRef;

/// A domain object whose content is fingerprinted.
///
/// Relation names are resolved by the entity's [`crate::EntitySource`].
/// Dependency paths may be dotted (`"comments.author"`) to reach through
/// intermediate entities.
pub trait TrackedEntity: Send + Sync {
    fn entity_ref(&self) -> EntityRef;

    /// Attribute names folded into the attribute fingerprint.
    fn hashable_attributes(&self) -> Vec<String>;

    /// Current value of an attribute, `None` if absent.
    fn attribute(&self, name: &str) -> Option<serde_json::Value>;

    /// Relation paths whose members feed the composite hash.
    fn composite_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Relations leading to entities that must be invalidated when this one changes.
    fn parent_relations(&self) -> Vec<String> {
        Vec::new()
    }
}
