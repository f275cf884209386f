//! Bulk recomputation: hashes, links, delivery tasks, and ancestor invalidation.

use ripple_core::EntityRef;
use ripple_core::entities::HashRecord;
use ripple_db::repos::hash::{HashChange, HashWrite};

use crate::HashEngine;
use crate::entity::TrackedEntity;
use crate::error::HashError;

/// Summary of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Records created, updated, or restored.
    pub updated: usize,
    pub unchanged: usize,
    /// Ancestors recomputed after invalidation.
    pub propagated: usize,
    /// Delivery tasks created or reset to pending.
    pub enqueued: usize,
    /// Entities that could not be processed, with the reason.
    pub failed: Vec<(EntityRef, String)>,
}

impl ProcessReport {
    #[must_use]
    pub const fn processed(&self) -> usize {
        self.updated + self.unchanged + self.failed.len()
    }
}

/// Result of recomputing a single entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityUpdate {
    pub change: HashChange,
    pub enqueued: usize,
    /// The record was flagged `invalidated_at`, either by this write or by an
    /// earlier pass that did not finish, and its links and tasks were redone.
    pub flagged: bool,
}

impl HashEngine {
    /// Recompute and store one entity's hashes.
    ///
    /// When the stored hashes change the dependency links are rewritten; when
    /// the effective hash changes every active target serving the type gets a
    /// pending delivery task. Unchanged entities cause no writes.
    ///
    /// The record stays flagged until the links and tasks are written, so a
    /// failure in between is picked up again by the next bulk detection.
    ///
    /// # Errors
    ///
    /// Hash computation or store errors.
    pub async fn update_entity(&self, entity: &dyn TrackedEntity) -> Result<EntityUpdate, HashError> {
        let (record, update) = self.store_entity(entity).await?;
        self.settle(&record).await?;
        Ok(update)
    }

    /// Write hashes, links, and delivery tasks, leaving the flag in place.
    async fn store_entity(
        &self,
        entity: &dyn TrackedEntity,
    ) -> Result<(HashRecord, EntityUpdate), HashError> {
        let hashes = self.compute_hashes(entity).await?;
        let entity_ref = entity.entity_ref();
        let (record, change) = self
            .store
            .upsert_hash(&HashWrite {
                entity_type: entity_ref.entity_type,
                entity_id: entity_ref.entity_id,
                attribute_hash: hashes.attribute_hash,
                composite_hash: hashes.composite_hash,
            })
            .await?;

        if record.invalidated_at.is_none() {
            let update = EntityUpdate { change, enqueued: 0, flagged: false };
            return Ok((record, update));
        }

        self.store.replace_links(&record.id, &hashes.links).await?;
        let enqueued = if change.effective_changed() {
            self.store.enqueue_for_active_targets(&record).await?.len()
        } else if change.is_changed() {
            0
        } else {
            self.store.enqueue_stale_for_active_targets(&record).await?.len()
        };
        Ok((record, EntityUpdate { change, enqueued, flagged: true }))
    }

    async fn settle(&self, record: &HashRecord) -> Result<(), HashError> {
        if let Some(seen) = record.invalidated_at {
            self.store.clear_invalidated(&record.id, seen).await?;
        }
        Ok(())
    }

    /// Detect and recompute changed entities of `entity_type`.
    ///
    /// # Errors
    ///
    /// Only errors that prevent the pass itself: an unregistered type, or
    /// source and store failures during detection. Per-entity failures land in
    /// [`ProcessReport::failed`].
    pub async fn process_changed_models(
        &self,
        entity_type: &str,
        limit: Option<usize>,
    ) -> Result<ProcessReport, HashError> {
        let ids = self.detect_changed_model_ids(entity_type, limit).await?;
        if ids.is_empty() {
            tracing::debug!(entity_type, "no changed entities");
            return Ok(ProcessReport::default());
        }
        self.update_hashes_for_ids(entity_type, &ids).await
    }

    /// Recompute the given entities of `entity_type`, page by page, then
    /// invalidate and recompute their ancestors.
    ///
    /// # Errors
    ///
    /// `HashError::UnknownEntityType` if the type has no registered source.
    pub async fn update_hashes_for_ids(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<ProcessReport, HashError> {
        let source = self.registry.source(entity_type)?;
        let mut report = ProcessReport::default();

        for chunk in entity_ids.chunks(self.batch_size()) {
            let mut flagged = Vec::new();

            for id in chunk {
                let entity_ref = EntityRef::new(entity_type, id.as_str());
                let entity = match source.load(id).await {
                    Ok(Some(entity)) => entity,
                    Ok(None) => {
                        let missing = HashError::EntityNotFound(entity_ref.clone());
                        record_failure(&mut report, entity_ref, &missing);
                        continue;
                    }
                    Err(e) => {
                        record_failure(&mut report, entity_ref, &e);
                        continue;
                    }
                };

                match self.store_entity(entity.as_ref()).await {
                    Ok((record, update)) => {
                        report.enqueued += update.enqueued;
                        if update.change.is_changed() {
                            report.updated += 1;
                        } else {
                            report.unchanged += 1;
                        }
                        if update.flagged {
                            flagged.push((entity_ref, record));
                        }
                    }
                    Err(e) => record_failure(&mut report, entity_ref, &e),
                }
            }

            if flagged.is_empty() {
                continue;
            }
            let refs: Vec<EntityRef> = flagged.iter().map(|(entity_ref, _)| entity_ref.clone()).collect();
            if !self.recompute_ancestors(&refs, &mut report).await {
                continue;
            }
            // Cleared only once the ancestors are flagged, so a failed
            // propagation is retried from these entities.
            for (entity_ref, record) in flagged {
                if let Err(e) = self.settle(&record).await {
                    record_failure(&mut report, entity_ref, &e);
                }
            }
        }

        tracing::info!(
            entity_type,
            updated = report.updated,
            unchanged = report.unchanged,
            propagated = report.propagated,
            enqueued = report.enqueued,
            failed = report.failed.len(),
            "hash processing complete"
        );
        Ok(report)
    }

    /// Invalidate the ancestors of `changed` and recompute them in this pass.
    ///
    /// Ancestors that cannot be loaded keep their invalidation flag for the
    /// next bulk detection. Returns `false` if the invalidation itself failed.
    async fn recompute_ancestors(&self, changed: &[EntityRef], report: &mut ProcessReport) -> bool {
        let ancestors = match self.propagate(changed).await {
            Ok(ancestors) => ancestors,
            Err(e) => {
                for entity in changed {
                    record_failure(report, entity.clone(), &e);
                }
                return false;
            }
        };

        for ancestor in ancestors {
            let loaded = match self.registry.load(&ancestor).await {
                Ok(Some(entity)) => entity,
                Ok(None) | Err(HashError::UnknownEntityType(_)) => continue,
                Err(e) => {
                    record_failure(report, ancestor, &e);
                    continue;
                }
            };
            match self.update_entity(loaded.as_ref()).await {
                Ok(update) => {
                    report.propagated += 1;
                    report.enqueued += update.enqueued;
                }
                Err(e) => record_failure(report, ancestor, &e),
            }
        }
        true
    }
}

fn record_failure(report: &mut ProcessReport, entity: EntityRef, error: &HashError) {
    tracing::warn!(entity = %entity, error = %error, "entity hash update failed");
    report.failed.push((entity, error.to_string()));
}
