//! Hash record repository: lookup, upsert with restore, invalidation, tombstones.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use ripple_core::entities::HashRecord;
use ripple_core::ids::PREFIX_HASH;

use crate::error::DatabaseError;
use crate::helpers::{
    fmt_datetime, get_opt_datetime, get_opt_string, now_utc, parse_datetime, placeholders,
};
use crate::service::RippleService;

const SELECT_COLS: &str = "id, entity_type, entity_id, attribute_hash, composite_hash, \
                           invalidated_at, tombstoned_at, created_at, updated_at";

/// Maximum ids bound into one `IN (...)` lookup.
const LOOKUP_CHUNK: usize = 500;

fn row_to_hash(row: &libsql::Row) -> Result<HashRecord, DatabaseError> {
    Ok(HashRecord {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        attribute_hash: row.get(3)?,
        composite_hash: get_opt_string(row, 4)?,
        invalidated_at: get_opt_datetime(row, 5)?,
        tombstoned_at: get_opt_datetime(row, 6)?,
        created_at: parse_datetime(&row.get::<String>(7)?)?,
        updated_at: parse_datetime(&row.get::<String>(8)?)?,
    })
}

/// Freshly computed hashes for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashWrite {
    pub entity_type: String,
    pub entity_id: String,
    pub attribute_hash: String,
    pub composite_hash: Option<String>,
}

impl HashWrite {
    /// Composite if present, else attribute hash.
    #[must_use]
    pub fn effective_hash(&self) -> &str {
        self.composite_hash.as_deref().unwrap_or(&self.attribute_hash)
    }

    fn matches(&self, record: &HashRecord) -> bool {
        record.attribute_hash == self.attribute_hash && record.composite_hash == self.composite_hash
    }
}

/// What [`RippleService::upsert_hash`] did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashChange {
    /// No record existed; one was inserted.
    Created,
    /// The live record's hashes changed. `effective_changed` is false when only
    /// the attribute hash moved under an unchanged composite hash.
    Updated { effective_changed: bool },
    /// A tombstoned record was brought back to life.
    Restored,
    /// Hashes matched; nothing was written.
    Unchanged,
}

impl HashChange {
    #[must_use]
    pub const fn is_changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Whether downstream consumers see a different effective hash.
    #[must_use]
    pub const fn effective_changed(self) -> bool {
        match self {
            Self::Created | Self::Restored => true,
            Self::Updated { effective_changed } => effective_changed,
            Self::Unchanged => false,
        }
    }
}

/// Rows removed by a hard purge of tombstoned records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub hashes: u64,
    pub links: u64,
    pub tasks: u64,
}

impl RippleService {
    pub async fn get_hash(&self, id: &str) -> Result<HashRecord, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(&format!("SELECT {SELECT_COLS} FROM hash_records WHERE id = ?1"), [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_hash(&row)
    }

    /// The live (non-tombstoned) record for an entity, if any.
    pub async fn find_hash(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<HashRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM hash_records
                     WHERE entity_type = ?1 AND entity_id = ?2 AND tombstoned_at IS NULL"
                ),
                [entity_type, entity_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_hash(&row)?)),
            None => Ok(None),
        }
    }

    /// The most recent record for an entity, live or tombstoned.
    ///
    /// A live record always wins over tombstoned ones.
    pub async fn find_latest_hash(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<HashRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM hash_records
                     WHERE entity_type = ?1 AND entity_id = ?2
                     ORDER BY tombstoned_at IS NULL DESC, updated_at DESC
                     LIMIT 1"
                ),
                [entity_type, entity_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_hash(&row)?)),
            None => Ok(None),
        }
    }

    /// Live records for a set of ids of one type, keyed by entity id.
    pub async fn find_hashes(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<HashMap<String, HashRecord>, DatabaseError> {
        let mut found = HashMap::with_capacity(entity_ids.len());
        for chunk in entity_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {SELECT_COLS} FROM hash_records
                 WHERE entity_type = ?1 AND tombstoned_at IS NULL AND entity_id IN ({})",
                placeholders(2, chunk.len())
            );
            let mut params: Vec<libsql::Value> = Vec::with_capacity(chunk.len() + 1);
            params.push(entity_type.into());
            params.extend(chunk.iter().map(|id| libsql::Value::from(id.as_str())));

            let mut rows = self
                .db()
                .conn()
                .query(&sql, libsql::params_from_iter(params))
                .await?;
            while let Some(row) = rows.next().await? {
                let record = row_to_hash(&row)?;
                found.insert(record.entity_id.clone(), record);
            }
        }
        Ok(found)
    }

    /// Page through live records of a type in entity-id order.
    ///
    /// Pass the last entity id of the previous page as `after`.
    pub async fn list_hashes(
        &self,
        entity_type: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<HashRecord>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM hash_records
                     WHERE entity_type = ?1 AND tombstoned_at IS NULL AND entity_id > ?2
                     ORDER BY entity_id
                     LIMIT ?3"
                ),
                libsql::params![entity_type, after.unwrap_or(""), limit],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_hash(&row)?);
        }
        Ok(records)
    }

    /// Insert, update, or restore the record for an entity.
    ///
    /// Writes nothing when the stored hashes already match. A record whose
    /// hashes were written is left flagged `invalidated_at` until the caller
    /// has finished the follow-up writes (links, delivery tasks) and calls
    /// [`Self::clear_invalidated`], so an interrupted update is detected again.
    ///
    /// Concurrent creators of the same entity converge on one live record:
    /// the last write wins.
    pub async fn upsert_hash(
        &self,
        write: &HashWrite,
    ) -> Result<(HashRecord, HashChange), DatabaseError> {
        let now = now_utc();

        if let Some(existing) = self.find_hash(&write.entity_type, &write.entity_id).await? {
            if write.matches(&existing) {
                return Ok((existing, HashChange::Unchanged));
            }

            self.db()
                .conn()
                .execute(
                    "UPDATE hash_records
                     SET attribute_hash = ?1, composite_hash = ?2, invalidated_at = ?3, updated_at = ?3
                     WHERE id = ?4",
                    libsql::params![
                        write.attribute_hash.as_str(),
                        write.composite_hash.as_deref(),
                        fmt_datetime(now),
                        existing.id.as_str()
                    ],
                )
                .await?;
            let effective_changed = existing.effective_hash() != write.effective_hash();
            let record = HashRecord {
                attribute_hash: write.attribute_hash.clone(),
                composite_hash: write.composite_hash.clone(),
                invalidated_at: Some(now),
                updated_at: now,
                ..existing
            };
            return Ok((record, HashChange::Updated { effective_changed }));
        }

        if let Some(tombstoned) = self
            .find_latest_hash(&write.entity_type, &write.entity_id)
            .await?
        {
            self.db()
                .conn()
                .execute(
                    "UPDATE hash_records
                     SET attribute_hash = ?1, composite_hash = ?2, invalidated_at = ?3,
                         tombstoned_at = NULL, updated_at = ?3
                     WHERE id = ?4",
                    libsql::params![
                        write.attribute_hash.as_str(),
                        write.composite_hash.as_deref(),
                        fmt_datetime(now),
                        tombstoned.id.as_str()
                    ],
                )
                .await?;
            tracing::debug!(
                entity_type = %write.entity_type,
                entity_id = %write.entity_id,
                hash_id = %tombstoned.id,
                "restored tombstoned hash record"
            );
            let record = HashRecord {
                attribute_hash: write.attribute_hash.clone(),
                composite_hash: write.composite_hash.clone(),
                invalidated_at: Some(now),
                tombstoned_at: None,
                updated_at: now,
                ..tombstoned
            };
            return Ok((record, HashChange::Restored));
        }

        // Another writer may create the live record between the lookups above
        // and this insert; the conflict clause turns that into an update.
        let id = self.db().generate_id(PREFIX_HASH).await?;
        self.db()
            .conn()
            .execute(
                &format!(
                    "INSERT INTO hash_records ({SELECT_COLS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?6, ?6)
                     ON CONFLICT (entity_type, entity_id) WHERE tombstoned_at IS NULL DO UPDATE SET
                         attribute_hash = excluded.attribute_hash,
                         composite_hash = excluded.composite_hash,
                         invalidated_at = excluded.invalidated_at,
                         updated_at = excluded.updated_at"
                ),
                libsql::params![
                    id.as_str(),
                    write.entity_type.as_str(),
                    write.entity_id.as_str(),
                    write.attribute_hash.as_str(),
                    write.composite_hash.as_deref(),
                    fmt_datetime(now)
                ],
            )
            .await?;

        let record = self
            .find_hash(&write.entity_type, &write.entity_id)
            .await?
            .ok_or(DatabaseError::NoResult)?;
        if record.id == id {
            return Ok((record, HashChange::Created));
        }
        tracing::debug!(
            entity_type = %write.entity_type,
            entity_id = %write.entity_id,
            hash_id = %record.id,
            "hash record created concurrently; overwrote it"
        );
        Ok((record, HashChange::Updated { effective_changed: true }))
    }

    /// Flag a live record as stale. Returns `false` if the entity has no live record.
    pub async fn mark_invalidated(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE hash_records SET invalidated_at = ?1
                 WHERE entity_type = ?2 AND entity_id = ?3 AND tombstoned_at IS NULL",
                libsql::params![fmt_datetime(now_utc()), entity_type, entity_id],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Clear the invalidation flag if it still carries the `seen` timestamp.
    ///
    /// Returns `false` when the record was invalidated again in the meantime
    /// (or no longer exists); the newer flag then stays for the next pass.
    pub async fn clear_invalidated(
        &self,
        hash_id: &str,
        seen: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE hash_records SET invalidated_at = NULL WHERE id = ?1 AND invalidated_at = ?2",
                libsql::params![hash_id, fmt_datetime(seen)],
            )
            .await?;
        Ok(affected > 0)
    }

    /// Tombstone the live records of the given ids. Reversible via [`Self::upsert_hash`].
    pub async fn tombstone_hashes(
        &self,
        entity_type: &str,
        entity_ids: &[String],
    ) -> Result<u64, DatabaseError> {
        let now = fmt_datetime(now_utc());
        let mut total = 0;
        for chunk in entity_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "UPDATE hash_records SET tombstoned_at = ?1, updated_at = ?1
                 WHERE entity_type = ?2 AND tombstoned_at IS NULL AND entity_id IN ({})",
                placeholders(3, chunk.len())
            );
            let mut params: Vec<libsql::Value> = Vec::with_capacity(chunk.len() + 2);
            params.push(now.as_str().into());
            params.push(entity_type.into());
            params.extend(chunk.iter().map(|id| libsql::Value::from(id.as_str())));
            total += self
                .db()
                .conn()
                .execute(&sql, libsql::params_from_iter(params))
                .await?;
        }
        Ok(total)
    }

    /// Hard-delete tombstoned records, cascading to their links and delivery tasks.
    ///
    /// `entity_type` narrows the purge to one type; `older_than` keeps records
    /// tombstoned at or after the cutoff.
    pub async fn purge_tombstoned(
        &self,
        entity_type: Option<&str>,
        older_than: Option<DateTime<Utc>>,
    ) -> Result<PurgeReport, DatabaseError> {
        let filter = "tombstoned_at IS NOT NULL
                      AND (?1 IS NULL OR entity_type = ?1)
                      AND (?2 IS NULL OR tombstoned_at < ?2)";
        let cutoff = older_than.map(fmt_datetime);

        let tx = self.db().conn().transaction().await?;

        let links = count(
            &tx,
            &format!(
                "SELECT COUNT(*) FROM dependency_links
                 WHERE hash_id IN (SELECT id FROM hash_records WHERE {filter})"
            ),
            entity_type,
            cutoff.as_deref(),
        )
        .await?;
        let tasks = count(
            &tx,
            &format!(
                "SELECT COUNT(*) FROM delivery_tasks
                 WHERE hash_id IN (SELECT id FROM hash_records WHERE {filter})"
            ),
            entity_type,
            cutoff.as_deref(),
        )
        .await?;

        // Explicit deletes keep the counts accurate even if foreign keys are off.
        for table in ["dependency_links", "delivery_tasks"] {
            tx.execute(
                &format!(
                    "DELETE FROM {table}
                     WHERE hash_id IN (SELECT id FROM hash_records WHERE {filter})"
                ),
                libsql::params![entity_type, cutoff.as_deref()],
            )
            .await?;
        }
        let hashes = tx
            .execute(
                &format!("DELETE FROM hash_records WHERE {filter}"),
                libsql::params![entity_type, cutoff.as_deref()],
            )
            .await?;
        tx.commit().await?;

        let report = PurgeReport {
            hashes,
            links,
            tasks,
        };
        tracing::info!(
            entity_type = entity_type.unwrap_or("*"),
            hashes = report.hashes,
            links = report.links,
            tasks = report.tasks,
            "purged tombstoned hash records"
        );
        Ok(report)
    }
}

async fn count(
    conn: &libsql::Connection,
    sql: &str,
    entity_type: Option<&str>,
    cutoff: Option<&str>,
) -> Result<u64, DatabaseError> {
    let mut rows = conn
        .query(sql, libsql::params![entity_type, cutoff])
        .await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    let n = row.get::<i64>(0)?;
    u64::try_from(n).map_err(|e| DatabaseError::Query(format!("negative count {n}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::helpers::{seed_hash, test_service};
    use pretty_assertions::assert_eq;

    fn write(id: &str, attr: &str, composite: Option<&str>) -> HashWrite {
        HashWrite {
            entity_type: "article".into(),
            entity_id: id.into(),
            attribute_hash: attr.into(),
            composite_hash: composite.map(String::from),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_reports_unchanged() {
        let svc = test_service().await;

        let (created, change) = svc.upsert_hash(&write("1", "aaa", None)).await.unwrap();
        assert_eq!(change, HashChange::Created);
        assert!(created.id.starts_with("hsh-"));

        let (again, change) = svc.upsert_hash(&write("1", "aaa", None)).await.unwrap();
        assert_eq!(change, HashChange::Unchanged);
        assert_eq!(again.id, created.id);
        assert_eq!(again.updated_at, created.updated_at);
    }

    #[tokio::test]
    async fn upsert_updates_on_composite_change() {
        let svc = test_service().await;
        svc.upsert_hash(&write("1", "aaa", Some("c1"))).await.unwrap();

        let (record, change) = svc.upsert_hash(&write("1", "aaa", Some("c2"))).await.unwrap();
        assert_eq!(change, HashChange::Updated { effective_changed: true });
        assert_eq!(record.effective_hash(), "c2");

        let stored = svc.find_hash("article", "1").await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn attribute_change_under_same_composite_keeps_effective_hash() {
        let svc = test_service().await;
        svc.upsert_hash(&write("1", "aaa", Some("c1"))).await.unwrap();

        let (_, change) = svc.upsert_hash(&write("1", "bbb", Some("c1"))).await.unwrap();
        assert_eq!(change, HashChange::Updated { effective_changed: false });
        assert!(change.is_changed());
        assert!(!change.effective_changed());
    }

    #[tokio::test]
    async fn written_records_stay_flagged_until_cleared() {
        let svc = test_service().await;
        let (created, _) = svc.upsert_hash(&write("1", "aaa", None)).await.unwrap();
        let seen = created.invalidated_at.expect("new record is flagged");

        let (again, change) = svc.upsert_hash(&write("1", "aaa", None)).await.unwrap();
        assert_eq!(change, HashChange::Unchanged);
        assert_eq!(again.invalidated_at, Some(seen));

        assert!(svc.clear_invalidated(&created.id, seen).await.unwrap());
        assert!(svc.find_hash("article", "1").await.unwrap().unwrap().invalidated_at.is_none());
    }

    #[tokio::test]
    async fn clear_invalidated_keeps_a_newer_flag() {
        let svc = test_service().await;
        let (created, _) = svc.upsert_hash(&write("1", "aaa", None)).await.unwrap();
        let stale = created.invalidated_at.unwrap() - chrono::Duration::seconds(1);

        assert!(!svc.clear_invalidated(&created.id, stale).await.unwrap());
        assert!(svc.find_hash("article", "1").await.unwrap().unwrap().invalidated_at.is_some());
    }

    #[tokio::test]
    async fn create_racing_another_writer_overwrites_its_live_record() {
        let svc = test_service().await;
        // Stand-in for a second process inserting the same entity between this
        // writer's lookup and its insert.
        svc.db()
            .conn()
            .execute(
                "CREATE TRIGGER other_writer BEFORE INSERT ON hash_records
                 WHEN NEW.id <> 'hsh-other' AND NOT EXISTS (
                     SELECT 1 FROM hash_records
                     WHERE entity_type = NEW.entity_type AND entity_id = NEW.entity_id
                       AND tombstoned_at IS NULL)
                 BEGIN
                     INSERT INTO hash_records (id, entity_type, entity_id, attribute_hash,
                                               created_at, updated_at)
                     VALUES ('hsh-other', NEW.entity_type, NEW.entity_id, 'theirs',
                             NEW.created_at, NEW.created_at);
                 END",
                (),
            )
            .await
            .unwrap();

        let (record, change) = svc.upsert_hash(&write("1", "ours", None)).await.unwrap();
        assert_eq!(change, HashChange::Updated { effective_changed: true });
        assert_eq!(record.id, "hsh-other");
        assert_eq!(record.attribute_hash, "ours");
        assert!(record.invalidated_at.is_some());

        let mut rows = svc
            .db()
            .conn()
            .query("SELECT COUNT(*) FROM hash_records WHERE entity_id = '1'", ())
            .await
            .unwrap();
        let live: i64 = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(live, 1);
    }

    #[tokio::test]
    async fn mark_invalidated_ignores_missing_entities() {
        let svc = test_service().await;
        assert!(!svc.mark_invalidated("article", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn tombstone_then_restore_keeps_id() {
        let svc = test_service().await;
        let original = seed_hash(&svc, "article", "1", "aaa").await;

        let n = svc.tombstone_hashes("article", &["1".into()]).await.unwrap();
        assert_eq!(n, 1);
        assert!(svc.find_hash("article", "1").await.unwrap().is_none());
        let latest = svc.find_latest_hash("article", "1").await.unwrap().unwrap();
        assert!(latest.is_tombstoned());

        let (restored, change) = svc.upsert_hash(&write("1", "bbb", None)).await.unwrap();
        assert_eq!(change, HashChange::Restored);
        assert_eq!(restored.id, original.id);
        assert!(restored.tombstoned_at.is_none());
        assert_eq!(restored.attribute_hash, "bbb");
    }

    #[tokio::test]
    async fn find_hashes_returns_only_live_matches() {
        let svc = test_service().await;
        seed_hash(&svc, "article", "1", "a").await;
        seed_hash(&svc, "article", "2", "b").await;
        seed_hash(&svc, "article", "3", "c").await;
        seed_hash(&svc, "author", "1", "x").await;
        svc.tombstone_hashes("article", &["3".into()]).await.unwrap();

        let ids: Vec<String> = ["1", "3", "9"].iter().map(ToString::to_string).collect();
        let found = svc.find_hashes("article", &ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["1"].attribute_hash, "a");
    }

    #[tokio::test]
    async fn list_hashes_pages_by_entity_id() {
        let svc = test_service().await;
        for id in ["a", "b", "c", "d", "e"] {
            seed_hash(&svc, "article", id, "h").await;
        }

        let first = svc.list_hashes("article", None, 2).await.unwrap();
        let ids: Vec<_> = first.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let second = svc.list_hashes("article", Some("b"), 10).await.unwrap();
        let ids: Vec<_> = second.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "e"]);
    }

    #[tokio::test]
    async fn purge_respects_type_and_cutoff() {
        let svc = test_service().await;
        seed_hash(&svc, "article", "1", "a").await;
        seed_hash(&svc, "author", "1", "b").await;
        seed_hash(&svc, "article", "2", "c").await;
        svc.tombstone_hashes("article", &["1".into()]).await.unwrap();
        svc.tombstone_hashes("author", &["1".into()]).await.unwrap();

        let past = Utc::now() - chrono::Duration::hours(1);
        let none = svc.purge_tombstoned(None, Some(past)).await.unwrap();
        assert_eq!(none, PurgeReport::default());

        let report = svc.purge_tombstoned(Some("article"), None).await.unwrap();
        assert_eq!(report.hashes, 1);
        assert!(svc.find_latest_hash("article", "1").await.unwrap().is_none());
        assert!(svc.find_latest_hash("author", "1").await.unwrap().is_some());
        assert!(svc.find_hash("article", "2").await.unwrap().is_some());
    }
}
