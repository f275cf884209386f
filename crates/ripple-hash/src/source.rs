//! Entity sources and the type registry.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use ripple_core::EntityRef;

use crate::entity::TrackedEntity;
use crate::error::HashError;

pub type BoxedEntity = Box<dyn TrackedEntity>;

/// Access to the instances of one entity type.
///
/// `scan` applies the type's scope predicate; `load` returns `None` for
/// instances that are gone or out of scope.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Type discriminator this source serves.
    fn entity_type(&self) -> &str;

    async fn load(&self, entity_id: &str) -> Result<Option<BoxedEntity>, HashError>;

    /// Up to `limit` in-scope entities with id greater than `after`, in id order.
    async fn scan(&self, after: Option<&str>, limit: usize) -> Result<Vec<BoxedEntity>, HashError>;

    /// The subset of `entity_ids` that still exist and are in scope.
    async fn existing_ids(&self, entity_ids: &[String]) -> Result<HashSet<String>, HashError>;

    /// Members of `relation` on `entity`.
    ///
    /// # Errors
    ///
    /// `HashError::UnknownRelation` if the type has no such relation.
    async fn related(
        &self,
        entity: &dyn TrackedEntity,
        relation: &str,
    ) -> Result<Vec<EntityRef>, HashError>;
}

/// Entity sources by type discriminator, populated at startup.
#[derive(Default)]
pub struct EntityRegistry {
    sources: HashMap<String, Arc<dyn EntitySource>>,
}

impl EntityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, replacing any previous source for its type.
    pub fn register(&mut self, source: Arc<dyn EntitySource>) {
        let entity_type = source.entity_type().to_string();
        if self.sources.insert(entity_type.clone(), source).is_some() {
            tracing::warn!(%entity_type, "entity source replaced");
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn EntitySource>) -> Self {
        self.register(source);
        self
    }

    /// # Errors
    ///
    /// `HashError::UnknownEntityType` if nothing is registered for the type.
    pub fn source(&self, entity_type: &str) -> Result<&Arc<dyn EntitySource>, HashError> {
        self.sources
            .get(entity_type)
            .ok_or_else(|| HashError::UnknownEntityType(entity_type.to_string()))
    }

    /// Load an entity by reference through its type's source.
    ///
    /// # Errors
    ///
    /// `HashError::UnknownEntityType` for unregistered types, or the source's error.
    pub async fn load(&self, entity: &EntityRef) -> Result<Option<BoxedEntity>, HashError> {
        self.source(&entity.entity_type)?
            .load(&entity.entity_id)
            .await
    }

    /// Registered type discriminators, sorted.
    #[must_use]
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}
