//! Change detection.
//!
//! Single-entity checks recompute everything. Bulk checks only compare the
//! attribute fingerprint and the invalidation flag, one store query per page.

use std::fmt;

use ripple_core::entities::HashRecord;

use crate::HashEngine;
use crate::composite::EntityHashes;
use crate::entity::TrackedEntity;
use crate::error::HashError;
use crate::fingerprint::fingerprint;

/// How an entity's current content compares to its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    /// No live record exists.
    New,
    /// Attribute or composite hash differs from the stored record.
    Changed,
    Unchanged,
}

impl ChangeState {
    #[must_use]
    pub const fn needs_update(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for ChangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn compare(hashes: &EntityHashes, stored: Option<&HashRecord>) -> ChangeState {
    match stored {
        None => ChangeState::New,
        Some(record)
            if record.attribute_hash == hashes.attribute_hash
                && record.composite_hash == hashes.composite_hash =>
        {
            ChangeState::Unchanged
        }
        Some(_) => ChangeState::Changed,
    }
}

impl HashEngine {
    /// Full recomputation of `entity` against its stored record.
    ///
    /// # Errors
    ///
    /// Any error from [`HashEngine::compute_hashes`] or the store.
    pub async fn detect(&self, entity: &dyn TrackedEntity) -> Result<ChangeState, HashError> {
        let hashes = self.compute_hashes(entity).await?;
        let entity_ref = entity.entity_ref();
        let stored = self
            .store
            .find_hash(&entity_ref.entity_type, &entity_ref.entity_id)
            .await?;
        Ok(compare(&hashes, stored.as_ref()))
    }

    /// Whether `entity` differs from its stored record (or has none).
    ///
    /// # Errors
    ///
    /// Any error from [`HashEngine::detect`].
    pub async fn has_changed(&self, entity: &dyn TrackedEntity) -> Result<bool, HashError> {
        Ok(self.detect(entity).await?.needs_update())
    }

    /// Number of entities of `entity_type` the bulk check flags as changed.
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn count_changed_models(
        &self,
        entity_type: &str,
        limit: Option<usize>,
    ) -> Result<usize, HashError> {
        Ok(self.detect_changed_model_ids(entity_type, limit).await?.len())
    }

    /// Ids of in-scope entities of `entity_type` with no live record, a different
    /// attribute fingerprint, or a pending invalidation. Stops after `limit` ids.
    ///
    /// Entities whose fingerprint cannot be computed are reported as changed so
    /// that processing surfaces the error.
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn detect_changed_model_ids(
        &self,
        entity_type: &str,
        limit: Option<usize>,
    ) -> Result<Vec<String>, HashError> {
        let source = self.registry.source(entity_type)?;
        let page_size = self.batch_size();
        let mut changed = Vec::new();
        let mut cursor: Option<String> = None;
        let mut scanned = 0usize;

        loop {
            let page = source.scan(cursor.as_deref(), page_size).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.entity_ref().entity_id);
            scanned += page.len();

            let ids: Vec<String> = page.iter().map(|e| e.entity_ref().entity_id).collect();
            let stored = self.store.find_hashes(entity_type, &ids).await?;

            for (entity, id) in page.iter().zip(ids) {
                let is_changed = match (stored.get(&id), fingerprint(entity.as_ref())) {
                    (Some(record), Ok(attribute_hash)) => {
                        record.invalidated_at.is_some() || record.attribute_hash != attribute_hash
                    }
                    _ => true,
                };
                if is_changed {
                    changed.push(id);
                    if limit.is_some_and(|max| changed.len() >= max) {
                        tracing::debug!(entity_type, scanned, changed = changed.len(), "change detection hit limit");
                        return Ok(changed);
                    }
                }
            }

            if page.len() < page_size {
                break;
            }
        }

        tracing::debug!(entity_type, scanned, changed = changed.len(), "change detection complete");
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn record(attr: &str, composite: Option<&str>) -> HashRecord {
        HashRecord {
            id: "hsh-1".into(),
            entity_type: "article".into(),
            entity_id: "1".into(),
            attribute_hash: attr.into(),
            composite_hash: composite.map(String::from),
            invalidated_at: None,
            tombstoned_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn hashes(attr: &str, composite: Option<&str>) -> EntityHashes {
        EntityHashes {
            attribute_hash: attr.into(),
            composite_hash: composite.map(String::from),
            links: Vec::new(),
        }
    }

    #[rstest]
    #[case(hashes("a", None), None, ChangeState::New)]
    #[case(hashes("a", None), Some(record("a", None)), ChangeState::Unchanged)]
    #[case(hashes("a", Some("c")), Some(record("a", Some("c"))), ChangeState::Unchanged)]
    #[case(hashes("b", None), Some(record("a", None)), ChangeState::Changed)]
    #[case(hashes("a", Some("d")), Some(record("a", Some("c"))), ChangeState::Changed)]
    #[case(hashes("a", None), Some(record("a", Some("c"))), ChangeState::Changed)]
    fn compare_states(
        #[case] computed: EntityHashes,
        #[case] stored: Option<HashRecord>,
        #[case] expected: ChangeState,
    ) {
        assert_eq!(compare(&computed, stored.as_ref()), expected);
    }

    #[test]
    fn unchanged_needs_no_update() {
        assert!(ChangeState::New.needs_update());
        assert!(ChangeState::Changed.needs_update());
        assert!(!ChangeState::Unchanged.needs_update());
        assert_eq!(ChangeState::Changed.to_string(), "changed");
    }
}
