//! Records whose source entities no longer exist.
//!
//! Cleanup tombstones them (reversible: a reappearing entity restores its
//! record in place). Purging hard-deletes tombstoned records together with
//! their links and delivery tasks.

use chrono::{DateTime, Utc};
use ripple_db::repos::hash::PurgeReport;

use crate::HashEngine;
use crate::error::HashError;

impl HashEngine {
    /// Ids of live records of `entity_type` whose entity is gone or out of scope.
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn detect_orphaned_hashes(&self, entity_type: &str) -> Result<Vec<String>, HashError> {
        let source = self.registry.source(entity_type)?;
        let page_size = self.config.batch_size.max(1);
        let mut orphaned = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .store
                .list_hashes(entity_type, cursor.as_deref(), page_size)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(last.entity_id.clone());

            let ids: Vec<String> = page.iter().map(|r| r.entity_id.clone()).collect();
            let existing = source.existing_ids(&ids).await?;
            orphaned.extend(ids.into_iter().filter(|id| !existing.contains(id)));

            if page.len() < page_size as usize {
                break;
            }
        }

        tracing::debug!(entity_type, orphaned = orphaned.len(), "orphan detection complete");
        Ok(orphaned)
    }

    /// Tombstone orphaned records of `entity_type`. Returns how many were tombstoned.
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn cleanup_orphaned_hashes(&self, entity_type: &str) -> Result<u64, HashError> {
        let orphaned = self.detect_orphaned_hashes(entity_type).await?;
        if orphaned.is_empty() {
            return Ok(0);
        }
        let tombstoned = self.store.tombstone_hashes(entity_type, &orphaned).await?;
        tracing::info!(entity_type, tombstoned, "orphaned hash records tombstoned");
        Ok(tombstoned)
    }

    /// Tombstone current orphans, then hard-delete tombstoned records of
    /// `entity_type` tombstoned before `older_than` (all of them if `None`).
    ///
    /// # Errors
    ///
    /// Source or store errors.
    pub async fn purge_orphaned_hashes(
        &self,
        entity_type: &str,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<PurgeReport, HashError> {
        self.cleanup_orphaned_hashes(entity_type).await?;
        Ok(self.store.purge_tombstoned(Some(entity_type), older_than).await?)
    }

    /// Hard-delete tombstoned records of every type.
    ///
    /// # Errors
    ///
    /// Store errors.
    pub async fn purge_tombstoned(
        &self,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<PurgeReport, HashError> {
        Ok(self.store.purge_tombstoned(None, older_than).await?)
    }
}
