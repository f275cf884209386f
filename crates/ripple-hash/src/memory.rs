//! In-memory entity source for fixtures and tests.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use ripple_core::EntityRef;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::entity::TrackedEntity;
use crate::error::HashError;
use crate::source::{BoxedEntity, EntitySource};

/// A free-form tracked entity.
///
/// Every attribute set with [`MemoryEntity::attr`] is hashable unless
/// [`MemoryEntity::hashable`] overrides the list.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntity {
    entity_type: String,
    entity_id: String,
    attributes: BTreeMap<String, Value>,
    hashable: Option<Vec<String>>,
    dependencies: Vec<String>,
    parents: Vec<String>,
    relations: BTreeMap<String, Vec<EntityRef>>,
}

impl MemoryEntity {
    #[must_use]
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            attributes: BTreeMap::new(),
            hashable: None,
            dependencies: Vec::new(),
            parents: Vec::new(),
            relations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    #[must_use]
    pub fn hashable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hashable = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Declare a composite dependency path, e.g. `"comments.author"`.
    #[must_use]
    pub fn depends_on(mut self, path: impl Into<String>) -> Self {
        self.dependencies.push(path.into());
        self
    }

    /// Declare a relation whose members are invalidated when this entity changes.
    #[must_use]
    pub fn parent(mut self, relation: impl Into<String>) -> Self {
        self.parents.push(relation.into());
        self
    }

    /// Set the members of a relation.
    #[must_use]
    pub fn relate<I>(mut self, relation: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = EntityRef>,
    {
        self.set_relation(relation, members);
        self
    }

    pub fn set_relation<I>(&mut self, relation: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = EntityRef>,
    {
        self.relations
            .insert(relation.into(), members.into_iter().collect());
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.entity_id
    }
}

impl TrackedEntity for MemoryEntity {
    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(&self.entity_type, &self.entity_id)
    }

    fn hashable_attributes(&self) -> Vec<String> {
        self.hashable
            .clone()
            .unwrap_or_else(|| self.attributes.keys().cloned().collect())
    }

    fn attribute(&self, name: &str) -> Option<Value> {
        self.attributes.get(name).cloned()
    }

    fn composite_dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn parent_relations(&self) -> Vec<String> {
        self.parents.clone()
    }
}

type ScopeFn = Box<dyn Fn(&MemoryEntity) -> bool + Send + Sync>;

/// [`EntitySource`] over a map of [`MemoryEntity`] values.
///
/// Deletion is soft by default so tests can exercise the orphan lifecycle.
pub struct MemorySource {
    entity_type: String,
    entities: RwLock<BTreeMap<String, (MemoryEntity, bool)>>,
    scope: Option<ScopeFn>,
}

impl MemorySource {
    #[must_use]
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entities: RwLock::new(BTreeMap::new()),
            scope: None,
        }
    }

    /// Restrict tracked instances to those matching `predicate`.
    #[must_use]
    pub fn with_scope(mut self, predicate: impl Fn(&MemoryEntity) -> bool + Send + Sync + 'static) -> Self {
        self.scope = Some(Box::new(predicate));
        self
    }

    /// Insert or replace an entity. Clears a previous soft delete.
    pub async fn insert(&self, entity: MemoryEntity) {
        self.entities
            .write()
            .await
            .insert(entity.entity_id.clone(), (entity, false));
    }

    /// The stored entity, including soft-deleted and out-of-scope ones.
    pub async fn get(&self, entity_id: &str) -> Option<MemoryEntity> {
        self.entities
            .read()
            .await
            .get(entity_id)
            .map(|(entity, _)| entity.clone())
    }

    /// Mutate a stored entity in place. Returns `false` if it does not exist.
    pub async fn update(&self, entity_id: &str, f: impl FnOnce(&mut MemoryEntity)) -> bool {
        match self.entities.write().await.get_mut(entity_id) {
            Some((entity, _)) => {
                f(entity);
                true
            }
            None => false,
        }
    }

    /// Hide an entity from the source while keeping it for [`Self::restore`].
    pub async fn soft_delete(&self, entity_id: &str) -> bool {
        self.set_deleted(entity_id, true).await
    }

    pub async fn restore(&self, entity_id: &str) -> bool {
        self.set_deleted(entity_id, false).await
    }

    pub async fn remove(&self, entity_id: &str) -> Option<MemoryEntity> {
        self.entities
            .write()
            .await
            .remove(entity_id)
            .map(|(entity, _)| entity)
    }

    async fn set_deleted(&self, entity_id: &str, deleted: bool) -> bool {
        match self.entities.write().await.get_mut(entity_id) {
            Some((_, flag)) => {
                *flag = deleted;
                true
            }
            None => false,
        }
    }

    fn visible(&self, entity: &MemoryEntity, deleted: bool) -> bool {
        !deleted && self.scope.as_ref().is_none_or(|scope| scope(entity))
    }
}

#[async_trait]
impl EntitySource for MemorySource {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    async fn load(&self, entity_id: &str) -> Result<Option<BoxedEntity>, HashError> {
        let entities = self.entities.read().await;
        Ok(entities
            .get(entity_id)
            .filter(|(entity, deleted)| self.visible(entity, *deleted))
            .map(|(entity, _)| Box::new(entity.clone()) as BoxedEntity))
    }

    async fn scan(&self, after: Option<&str>, limit: usize) -> Result<Vec<BoxedEntity>, HashError> {
        let entities = self.entities.read().await;
        Ok(entities
            .iter()
            .filter(|(id, _)| after.is_none_or(|cursor| id.as_str() > cursor))
            .filter(|(_, (entity, deleted))| self.visible(entity, *deleted))
            .take(limit)
            .map(|(_, (entity, _))| Box::new(entity.clone()) as BoxedEntity)
            .collect())
    }

    async fn existing_ids(&self, entity_ids: &[String]) -> Result<HashSet<String>, HashError> {
        let entities = self.entities.read().await;
        Ok(entity_ids
            .iter()
            .filter(|id| {
                entities
                    .get(id.as_str())
                    .is_some_and(|(entity, deleted)| self.visible(entity, *deleted))
            })
            .cloned()
            .collect())
    }

    async fn related(
        &self,
        entity: &dyn TrackedEntity,
        relation: &str,
    ) -> Result<Vec<EntityRef>, HashError> {
        let entity_ref = entity.entity_ref();
        let entities = self.entities.read().await;
        let Some((stored, _)) = entities.get(&entity_ref.entity_id) else {
            return Ok(Vec::new());
        };
        let declared = stored.dependencies.iter().chain(&stored.parents).any(|path| {
            path == relation || path.starts_with(&format!("{relation}."))
        });
        match stored.relations.get(relation) {
            Some(members) => Ok(members.clone()),
            None if declared => Ok(Vec::new()),
            None => Err(HashError::UnknownRelation {
                entity: entity_ref,
                relation: relation.to_string(),
            }),
        }
    }
}
