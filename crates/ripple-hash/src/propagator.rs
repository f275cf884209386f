//! Breadth-first invalidation of ancestors.
//!
//! Parents of a changed entity are found through its declared parent relations
//! and through stored dependency links that point at it. Every ancestor with a
//! live record is flagged `invalidated_at`, so a later bulk detection finds it
//! even if the current pass never recomputes it.

use std::collections::{HashSet, VecDeque};

use ripple_core::EntityRef;

use crate::HashEngine;
use crate::error::HashError;

impl HashEngine {
    /// Invalidate the ancestors of `changed`, nearest first.
    ///
    /// Each entity is visited at most once per pass; the walk stops at
    /// `hashing.propagation_depth` levels (0 = unbounded). Returns the
    /// ancestors that were flagged, in visit order.
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn propagate(&self, changed: &[EntityRef]) -> Result<Vec<EntityRef>, HashError> {
        let max_depth = self.config.propagation_depth;
        let mut visited: HashSet<EntityRef> = changed.iter().cloned().collect();
        let mut queue: VecDeque<(EntityRef, u32)> = changed.iter().cloned().map(|r| (r, 0)).collect();
        let mut invalidated = Vec::new();

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth > 0 && depth >= max_depth {
                continue;
            }

            for parent in self.parents_of(&current).await? {
                if !visited.insert(parent.clone()) {
                    continue;
                }
                if self
                    .store
                    .mark_invalidated(&parent.entity_type, &parent.entity_id)
                    .await?
                {
                    invalidated.push(parent.clone());
                }
                queue.push_back((parent, depth + 1));
            }
        }

        if !invalidated.is_empty() {
            tracing::debug!(
                changed = changed.len(),
                invalidated = invalidated.len(),
                "propagated invalidation to ancestors"
            );
        }
        Ok(invalidated)
    }

    /// Declared parents plus owners of stored links to `entity`, sorted.
    async fn parents_of(&self, entity: &EntityRef) -> Result<Vec<EntityRef>, HashError> {
        let mut parents = self.store.dependents_of(entity).await?;

        // Types without a registered source are only reachable through links.
        if let Ok(source) = self.registry.source(&entity.entity_type) {
            if let Some(loaded) = source.load(&entity.entity_id).await? {
                for relation in loaded.parent_relations() {
                    parents.extend(source.related(loaded.as_ref(), &relation).await?);
                }
            }
        }

        parents.sort();
        parents.dedup();
        parents.retain(|p| p != entity);
        Ok(parents)
    }
}
