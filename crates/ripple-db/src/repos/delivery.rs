//! Delivery task repository: the publish queue and its compare-and-set transitions.

use chrono::{DateTime, Utc};

use ripple_core::entities::{DeliveryTask, HashRecord};
use ripple_core::enums::{DeliveryStatus, ErrorKind};
use ripple_core::ids::PREFIX_TASK;

use crate::error::DatabaseError;
use crate::helpers::{
    fmt_datetime, get_opt_datetime, get_opt_string, json_to_sql, now_utc, parse_datetime,
    parse_enum, parse_optional_json,
};
use crate::service::RippleService;
use crate::updates::delivery::TaskOutcomeUpdate;

const SELECT_COLS: &str = "id, hash_id, target_id, delivered_hash, delivered_at, status, attempts, \
                           last_error, last_response_code, error_kind, next_attempt_at, metadata, \
                           created_at, updated_at";

/// `WHERE` fragment selecting due tasks; `?1` is the current time.
const DUE_FILTER: &str = "(status = 'pending'
                           OR (status = 'deferred' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)))";

fn row_to_task(row: &libsql::Row) -> Result<DeliveryTask, DatabaseError> {
    let error_kind = get_opt_string(row, 9)?
        .map(|s| parse_enum::<ErrorKind>(&s))
        .transpose()?;
    let last_response_code = row
        .get::<Option<i64>>(8)?
        .map(u16::try_from)
        .transpose()
        .map_err(|e| DatabaseError::Query(format!("response code out of range: {e}")))?;
    let attempts = u32::try_from(row.get::<i64>(6)?)
        .map_err(|e| DatabaseError::Query(format!("attempts out of range: {e}")))?;

    Ok(DeliveryTask {
        id: row.get(0)?,
        hash_id: get_opt_string(row, 1)?,
        target_id: row.get(2)?,
        delivered_hash: get_opt_string(row, 3)?,
        delivered_at: get_opt_datetime(row, 4)?,
        status: parse_enum(&row.get::<String>(5)?)?,
        attempts,
        last_error: get_opt_string(row, 7)?,
        last_response_code,
        error_kind,
        next_attempt_at: get_opt_datetime(row, 10)?,
        metadata: parse_optional_json(get_opt_string(row, 11)?.as_deref())?,
        created_at: parse_datetime(&row.get::<String>(12)?)?,
        updated_at: parse_datetime(&row.get::<String>(13)?)?,
    })
}

/// Task counts per status for one target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub pending: u64,
    pub dispatched: u64,
    pub deferred: u64,
    pub published: u64,
    pub failed: u64,
    pub source_deleted: u64,
}

impl DeliveryStats {
    #[must_use]
    pub const fn get(&self, status: DeliveryStatus) -> u64 {
        match status {
            DeliveryStatus::Pending => self.pending,
            DeliveryStatus::Dispatched => self.dispatched,
            DeliveryStatus::Deferred => self.deferred,
            DeliveryStatus::Published => self.published,
            DeliveryStatus::Failed => self.failed,
            DeliveryStatus::SourceDeleted => self.source_deleted,
        }
    }

    fn slot(&mut self, status: DeliveryStatus) -> &mut u64 {
        match status {
            DeliveryStatus::Pending => &mut self.pending,
            DeliveryStatus::Dispatched => &mut self.dispatched,
            DeliveryStatus::Deferred => &mut self.deferred,
            DeliveryStatus::Published => &mut self.published,
            DeliveryStatus::Failed => &mut self.failed,
            DeliveryStatus::SourceDeleted => &mut self.source_deleted,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending
            + self.dispatched
            + self.deferred
            + self.published
            + self.failed
            + self.source_deleted
    }
}

impl RippleService {
    /// Queue delivery of `hash_id` to `target_id`.
    ///
    /// An existing task for the pair is reset to `pending` whatever its status,
    /// with attempts and error columns cleared.
    pub async fn enqueue_for_hash(
        &self,
        hash_id: &str,
        target_id: &str,
    ) -> Result<DeliveryTask, DatabaseError> {
        let now = fmt_datetime(now_utc());
        let id = self.db().generate_id(PREFIX_TASK).await?;

        self.db()
            .conn()
            .execute(
                "INSERT INTO delivery_tasks (id, hash_id, target_id, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', 0, ?4, ?4)
                 ON CONFLICT (hash_id, target_id) WHERE hash_id IS NOT NULL DO UPDATE SET
                     status = 'pending',
                     attempts = 0,
                     last_error = NULL,
                     last_response_code = NULL,
                     error_kind = NULL,
                     next_attempt_at = NULL,
                     updated_at = excluded.updated_at",
                libsql::params![id.as_str(), hash_id, target_id, now.as_str()],
            )
            .await?;

        self.find_task(hash_id, target_id)
            .await?
            .ok_or(DatabaseError::NoResult)
    }

    /// Queue `hash` for every active target serving its entity type.
    pub async fn enqueue_for_active_targets(
        &self,
        hash: &HashRecord,
    ) -> Result<Vec<DeliveryTask>, DatabaseError> {
        let targets = self.targets_for_entity_type(&hash.entity_type).await?;
        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            tasks.push(self.enqueue_for_hash(&hash.id, &target.id).await?);
        }
        if !tasks.is_empty() {
            tracing::debug!(
                hash_id = %hash.id,
                entity_type = %hash.entity_type,
                targets = tasks.len(),
                "delivery tasks enqueued"
            );
        }
        Ok(tasks)
    }

    /// Queue `hash` for the active targets that have not seen its current hashes:
    /// targets with no task for it, or whose task was last touched before the
    /// record's hashes were written.
    ///
    /// Used to finish an update that stored new hashes but stopped before
    /// enqueueing; tasks enqueued or worked since then are left alone.
    pub async fn enqueue_stale_for_active_targets(
        &self,
        hash: &HashRecord,
    ) -> Result<Vec<DeliveryTask>, DatabaseError> {
        let targets = self.targets_for_entity_type(&hash.entity_type).await?;
        let mut tasks = Vec::new();
        for target in targets {
            let stale = match self.find_task(&hash.id, &target.id).await? {
                Some(task) => task.updated_at < hash.updated_at,
                None => true,
            };
            if stale {
                tasks.push(self.enqueue_for_hash(&hash.id, &target.id).await?);
            }
        }
        if !tasks.is_empty() {
            tracing::info!(
                hash_id = %hash.id,
                entity_type = %hash.entity_type,
                targets = tasks.len(),
                "missed delivery tasks enqueued"
            );
        }
        Ok(tasks)
    }

    pub async fn get_task(&self, id: &str) -> Result<DeliveryTask, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(&format!("SELECT {SELECT_COLS} FROM delivery_tasks WHERE id = ?1"), [id])
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        row_to_task(&row)
    }

    pub async fn find_task(
        &self,
        hash_id: &str,
        target_id: &str,
    ) -> Result<Option<DeliveryTask>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM delivery_tasks WHERE hash_id = ?1 AND target_id = ?2"
                ),
                [hash_id, target_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_task(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn tasks_for_hash(&self, hash_id: &str) -> Result<Vec<DeliveryTask>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM delivery_tasks WHERE hash_id = ?1 ORDER BY target_id"
                ),
                [hash_id],
            )
            .await?;
        collect_tasks(&mut rows).await
    }

    /// Tasks of one target, optionally filtered by status, oldest first.
    pub async fn list_tasks_for_target(
        &self,
        target_id: &str,
        status: Option<DeliveryStatus>,
        limit: u32,
    ) -> Result<Vec<DeliveryTask>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM delivery_tasks
                     WHERE target_id = ?1 AND (?2 IS NULL OR status = ?2)
                     ORDER BY created_at, id
                     LIMIT ?3"
                ),
                libsql::params![target_id, status.map(DeliveryStatus::as_str), limit],
            )
            .await?;
        collect_tasks(&mut rows).await
    }

    /// Targets with at least one due task, in order of their oldest due task.
    pub async fn due_target_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT target_id FROM delivery_tasks
                     WHERE {DUE_FILTER}
                     GROUP BY target_id
                     ORDER BY MIN(created_at), target_id"
                ),
                [fmt_datetime(now)],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    /// Due tasks of one target, oldest first. `limit == 0` means no limit.
    pub async fn due_tasks(
        &self,
        target_id: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<DeliveryTask>, DatabaseError> {
        let limit = if limit == 0 { -1 } else { i64::from(limit) };
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!(
                    "SELECT {SELECT_COLS} FROM delivery_tasks
                     WHERE {DUE_FILTER} AND target_id = ?2
                     ORDER BY created_at, id
                     LIMIT ?3"
                ),
                libsql::params![fmt_datetime(now), target_id, limit],
            )
            .await?;
        collect_tasks(&mut rows).await
    }

    pub async fn has_due_tasks(&self, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                &format!("SELECT EXISTS (SELECT 1 FROM delivery_tasks WHERE {DUE_FILTER})"),
                [fmt_datetime(now)],
            )
            .await?;
        let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
        Ok(row.get::<i64>(0)? != 0)
    }

    /// Claim a task for delivery: `expected -> dispatched`, incrementing attempts.
    ///
    /// Returns `None` when the task is no longer in `expected` status.
    pub async fn mark_dispatched(
        &self,
        task_id: &str,
        expected: DeliveryStatus,
    ) -> Result<Option<DeliveryTask>, DatabaseError> {
        if !expected.can_transition_to(DeliveryStatus::Dispatched) {
            return Err(DatabaseError::InvalidTransition {
                from: expected,
                to: DeliveryStatus::Dispatched,
            });
        }
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE delivery_tasks
                 SET status = 'dispatched', attempts = attempts + 1, updated_at = ?1
                 WHERE id = ?2 AND status = ?3",
                libsql::params![fmt_datetime(now_utc()), task_id, expected.as_str()],
            )
            .await?;
        if affected == 0 {
            return Ok(None);
        }
        Ok(Some(self.get_task(task_id).await?))
    }

    /// Settle a dispatched task. Returns `false` if it left `dispatched` meanwhile,
    /// e.g. because a newer hash re-enqueued it.
    pub async fn complete_task(
        &self,
        task_id: &str,
        update: &TaskOutcomeUpdate,
    ) -> Result<bool, DatabaseError> {
        if !DeliveryStatus::Dispatched.can_transition_to(update.status) {
            return Err(DatabaseError::InvalidTransition {
                from: DeliveryStatus::Dispatched,
                to: update.status,
            });
        }

        let mut sets = vec!["status = ?1".to_string()];
        let mut params: Vec<libsql::Value> = vec![update.status.as_str().into()];
        let mut idx = 2usize;

        if let Some(ref hash) = update.delivered_hash {
            sets.push(format!("delivered_hash = ?{idx}"));
            params.push(hash.clone().map_or(libsql::Value::Null, Into::into));
            idx += 1;
        }
        if let Some(at) = update.delivered_at {
            sets.push(format!("delivered_at = ?{idx}"));
            params.push(at.map_or(libsql::Value::Null, |dt| fmt_datetime(dt).into()));
            idx += 1;
        }
        if let Some(ref error) = update.last_error {
            sets.push(format!("last_error = ?{idx}"));
            params.push(error.clone().map_or(libsql::Value::Null, Into::into));
            idx += 1;
        }
        if let Some(code) = update.last_response_code {
            sets.push(format!("last_response_code = ?{idx}"));
            params.push(code.map_or(libsql::Value::Null, |c| i64::from(c).into()));
            idx += 1;
        }
        if let Some(kind) = update.error_kind {
            sets.push(format!("error_kind = ?{idx}"));
            params.push(kind.map_or(libsql::Value::Null, |k| k.as_str().into()));
            idx += 1;
        }
        if let Some(at) = update.next_attempt_at {
            sets.push(format!("next_attempt_at = ?{idx}"));
            params.push(at.map_or(libsql::Value::Null, |dt| fmt_datetime(dt).into()));
            idx += 1;
        }
        if let Some(ref metadata) = update.metadata {
            sets.push(format!("metadata = ?{idx}"));
            params.push(json_to_sql(metadata.as_ref())?);
            idx += 1;
        }

        sets.push(format!("updated_at = ?{idx}"));
        params.push(fmt_datetime(now_utc()).into());
        idx += 1;

        params.push(task_id.into());
        let sql = format!(
            "UPDATE delivery_tasks SET {} WHERE id = ?{idx} AND status = 'dispatched'",
            sets.join(", ")
        );
        let affected = self
            .db()
            .conn()
            .execute(&sql, libsql::params_from_iter(params))
            .await?;

        if affected == 0 {
            tracing::warn!(task_id, status = %update.status, "task left dispatched before completion");
        }
        Ok(affected > 0)
    }

    /// Put a terminal task back in the queue with counters reset.
    pub async fn requeue_task(&self, task_id: &str) -> Result<DeliveryTask, DatabaseError> {
        let task = self.get_task(task_id).await?;
        if !task.status.can_requeue() {
            return Err(DatabaseError::InvalidTransition {
                from: task.status,
                to: DeliveryStatus::Pending,
            });
        }

        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE delivery_tasks
                 SET status = 'pending', attempts = 0, last_error = NULL, last_response_code = NULL,
                     error_kind = NULL, next_attempt_at = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = ?3",
                libsql::params![fmt_datetime(now_utc()), task_id, task.status.as_str()],
            )
            .await?;
        if affected == 0 {
            return Err(DatabaseError::InvalidState(format!(
                "task {task_id} changed status during requeue"
            )));
        }
        tracing::info!(task_id, from = %task.status, "delivery task requeued");
        self.get_task(task_id).await
    }

    /// Requeue every failed task of a target. Returns the number requeued.
    pub async fn requeue_failed(&self, target_id: &str) -> Result<u64, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE delivery_tasks
                 SET status = 'pending', attempts = 0, last_error = NULL, last_response_code = NULL,
                     error_kind = NULL, next_attempt_at = NULL, updated_at = ?1
                 WHERE target_id = ?2 AND status = 'failed'",
                libsql::params![fmt_datetime(now_utc()), target_id],
            )
            .await?;
        tracing::info!(target_id, requeued = affected, "failed delivery tasks requeued");
        Ok(affected)
    }

    /// Return tasks dispatched before `cutoff` to `pending`. Attempts are kept.
    pub async fn reconcile_stale_dispatched(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let affected = self
            .db()
            .conn()
            .execute(
                "UPDATE delivery_tasks SET status = 'pending', updated_at = ?1
                 WHERE status = 'dispatched' AND updated_at < ?2",
                libsql::params![fmt_datetime(now_utc()), fmt_datetime(cutoff)],
            )
            .await?;
        if affected > 0 {
            tracing::warn!(reconciled = affected, "stale dispatched tasks returned to pending");
        }
        Ok(affected)
    }

    pub async fn delivery_stats(&self, target_id: &str) -> Result<DeliveryStats, DatabaseError> {
        let mut rows = self
            .db()
            .conn()
            .query(
                "SELECT status, COUNT(*) FROM delivery_tasks WHERE target_id = ?1 GROUP BY status",
                [target_id],
            )
            .await?;
        let mut stats = DeliveryStats::default();
        while let Some(row) = rows.next().await? {
            let status: DeliveryStatus = parse_enum(&row.get::<String>(0)?)?;
            let n = u64::try_from(row.get::<i64>(1)?)
                .map_err(|e| DatabaseError::Query(format!("negative count: {e}")))?;
            *stats.slot(status) = n;
        }
        Ok(stats)
    }
}

async fn collect_tasks(rows: &mut libsql::Rows) -> Result<Vec<DeliveryTask>, DatabaseError> {
    let mut tasks = Vec::new();
    while let Some(row) = rows.next().await? {
        tasks.push(row_to_task(&row)?);
    }
    Ok(tasks)
}
