//! Lease-guarded publish scheduler.
//!
//! One invocation ([`PublishScheduler::run_once`]):
//!
//! 1. takes the scheduler lease, or returns a skipped report if it is held;
//! 2. returns tasks stuck in `dispatched` to `pending`;
//! 3. walks the targets with due tasks, sequentially, publishing up to the
//!    contract's batch size per target;
//! 4. releases the lease, even when the run failed, timed out, or panicked.
//!
//! [`PublishScheduler::run`] repeats invocations while due tasks remain.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use ripple_config::PublishConfig;
use ripple_core::entities::{DeliveryTarget, DeliveryTask, HashRecord};
use ripple_core::enums::{Disposition, ErrorKind};
use ripple_core::ids::PREFIX_LEASE_OWNER;
use ripple_db::error::DatabaseError;
use ripple_db::helpers::now_utc;
use ripple_db::service::RippleService;
use ripple_hash::{EntityRegistry, HashError};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::budget::{BudgetBreach, ErrorBudget};
use crate::contract::{ContractRegistry, DeliveryContext, DeliveryContract};
use crate::error::{DeliveryError, PublishError};
use crate::outcome::{DeliveryFailure, TaskOutcome};
use crate::retry::{RetryDecision, RetrySchedule};

/// Counts for one target within one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetReport {
    pub target: String,
    pub published: u32,
    pub skipped: u32,
    pub source_deleted: u32,
    pub deferred: u32,
    pub failed: u32,
    /// Tasks that changed status underneath the scheduler and were left alone.
    pub lost: u32,
    pub stopped_by_contract: bool,
    pub budget_breach: Option<BudgetBreach>,
}

impl TargetReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    const fn record(&mut self, outcome: &TaskOutcome) {
        match outcome {
            TaskOutcome::Success { .. } => self.published += 1,
            TaskOutcome::Skipped => self.skipped += 1,
            TaskOutcome::SourceDeleted => self.source_deleted += 1,
            TaskOutcome::Deferred { .. } | TaskOutcome::StopRun { retry_at: Some(_), .. } => {
                self.deferred += 1;
            }
            TaskOutcome::Failed(_) | TaskOutcome::StopRun { retry_at: None, .. } => {
                self.failed += 1;
            }
        }
    }

    /// Tasks settled in this run.
    #[must_use]
    pub const fn settled(&self) -> u32 {
        self.published + self.skipped + self.source_deleted + self.deferred + self.failed
    }

    /// Whether the target's batch was abandoned part-way.
    #[must_use]
    pub const fn stopped(&self) -> bool {
        self.stopped_by_contract || self.budget_breach.is_some()
    }
}

impl fmt::Display for TargetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} published, {} skipped, {} deferred, {} failed, {} source_deleted",
            self.target, self.published, self.skipped, self.deferred, self.failed, self.source_deleted
        )
    }
}

/// Result of one scheduler invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// The lease was held elsewhere; nothing was done.
    pub skipped: bool,
    pub reconciled: u64,
    pub targets: Vec<TargetReport>,
    /// Targets that ran to completion still have due tasks.
    pub more_due: bool,
}

impl RunReport {
    fn lease_held() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn settled(&self) -> u32 {
        self.targets.iter().map(TargetReport::settled).sum()
    }

    #[must_use]
    pub fn target(&self, name: &str) -> Option<&TargetReport> {
        self.targets.iter().find(|t| t.target == name)
    }
}

/// Keeps the scheduler lease alive across a long run.
struct LeaseKeeper<'a> {
    store: &'a RippleService,
    key: &'a str,
    owner: &'a str,
    ttl: Duration,
    renewed_at: Instant,
}

impl LeaseKeeper<'_> {
    /// Renew once half the TTL has elapsed.
    async fn keep_alive(&mut self) -> Result<(), PublishError> {
        if self.renewed_at.elapsed() < self.ttl / 2 {
            return Ok(());
        }
        if self
            .store
            .renew_lease(self.key, self.owner, self.ttl)
            .await?
            .is_none()
        {
            return Err(PublishError::LeaseLost {
                key: self.key.to_string(),
            });
        }
        self.renewed_at = Instant::now();
        tracing::debug!(key = self.key, owner = self.owner, "scheduler lease renewed");
        Ok(())
    }
}

/// Drains due delivery tasks through their targets' contracts.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct PublishScheduler {
    store: Arc<RippleService>,
    registry: Arc<EntityRegistry>,
    contracts: Arc<ContractRegistry>,
    config: PublishConfig,
}

impl PublishScheduler {
    #[must_use]
    pub const fn new(
        store: Arc<RippleService>,
        registry: Arc<EntityRegistry>,
        contracts: Arc<ContractRegistry>,
        config: PublishConfig,
    ) -> Self {
        Self {
            store,
            registry,
            contracts,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &PublishConfig {
        &self.config
    }

    /// One lease-guarded invocation.
    ///
    /// # Errors
    ///
    /// Store failures, a lost lease, the run timeout, or a panic inside a
    /// contract. The lease is released in every case.
    pub async fn run_once(&self) -> Result<RunReport, PublishError> {
        let key = self.config.lease_key.as_str();
        let ttl = self.config.lease_ttl();
        let owner = self.store.db().generate_id(PREFIX_LEASE_OWNER).await?;

        if self.store.try_acquire_lease(key, &owner, ttl).await?.is_none() {
            tracing::info!(lease = key, "publish run skipped, lease held elsewhere");
            return Ok(RunReport::lease_held());
        }

        let mut lease = LeaseKeeper {
            store: &self.store,
            key,
            owner: &owner,
            ttl,
            renewed_at: Instant::now(),
        };
        let timeout = self.config.run_timeout();
        let run = AssertUnwindSafe(tokio::time::timeout(timeout, self.drain(&mut lease)))
            .catch_unwind()
            .await;

        match self.store.release_lease(key, &owner).await {
            Ok(true) => tracing::debug!(lease = key, owner = %owner, "scheduler lease released"),
            Ok(false) => tracing::warn!(lease = key, owner = %owner, "scheduler lease was already gone"),
            Err(error) => tracing::error!(lease = key, %error, "failed to release scheduler lease"),
        }

        let report = match run {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => {
                tracing::error!(?timeout, "publish run timed out");
                return Err(PublishError::Timeout(timeout));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(panic = %message, "publish run panicked");
                return Err(PublishError::Panicked(message));
            }
        };

        tracing::info!(
            targets = report.targets.len(),
            settled = report.settled(),
            reconciled = report.reconciled,
            more_due = report.more_due,
            "publish run finished"
        );
        Ok(report)
    }

    /// Invoke [`Self::run_once`] until no due work remains, pausing
    /// `publish.dispatch_delay_ms` between invocations.
    ///
    /// Stops early when the lease is held elsewhere or an invocation settles
    /// nothing.
    ///
    /// # Errors
    ///
    /// The first invocation error.
    pub async fn run(&self) -> Result<Vec<RunReport>, PublishError> {
        let mut reports = Vec::new();
        loop {
            let report = self.run_once().await?;
            let again = report.more_due && !report.skipped && report.settled() > 0;
            reports.push(report);
            if !again {
                return Ok(reports);
            }
            tokio::time::sleep(self.config.dispatch_delay()).await;
        }
    }

    /// Run [`Self::run`] on the tokio runtime.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> JoinHandle<Result<Vec<RunReport>, PublishError>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn drain(&self, lease: &mut LeaseKeeper<'_>) -> Result<RunReport, PublishError> {
        let stale = chrono::Duration::from_std(self.config.stale_dispatch())
            .map_err(|e| anyhow::anyhow!("stale dispatch window out of range: {e}"))?;
        let reconciled = self.store.reconcile_stale_dispatched(now_utc() - stale).await?;

        let mut report = RunReport {
            reconciled,
            ..RunReport::default()
        };
        let mut completed = HashSet::new();

        for target_id in self.store.due_target_ids(now_utc()).await? {
            let target = self.store.get_target(&target_id).await?;
            if !target.is_active() {
                tracing::debug!(target = %target.name, "skipping inactive target");
                continue;
            }
            let Some(contract) = self.contracts.get(&target.name) else {
                tracing::warn!(target = %target.name, "no delivery contract registered for target");
                continue;
            };

            let target_report = self
                .publish_target(&target, contract.as_ref(), lease)
                .await?;
            if !target_report.stopped() {
                completed.insert(target.id.clone());
            }
            report.targets.push(target_report);
        }

        report.more_due = self
            .store
            .due_target_ids(now_utc())
            .await?
            .iter()
            .any(|id| completed.contains(id));
        Ok(report)
    }

    async fn publish_target(
        &self,
        target: &DeliveryTarget,
        contract: &dyn DeliveryContract,
        lease: &mut LeaseKeeper<'_>,
    ) -> Result<TargetReport, PublishError> {
        let batch_size = contract
            .batch_size()
            .unwrap_or(self.config.default_batch_size);
        let tasks = self.store.due_tasks(&target.id, now_utc(), batch_size).await?;
        let schedule = contract.retry_intervals();
        let delay = Duration::from_millis(contract.inter_task_delay_ms());
        let mut budget = ErrorBudget::new(
            contract.max_validation_errors(),
            contract.max_infrastructure_errors(),
        );
        let mut report = TargetReport::new(&target.name);

        tracing::debug!(target = %target.name, due = tasks.len(), "publishing target");

        for task in tasks {
            lease.keep_alive().await?;

            let Some(task) = self.store.mark_dispatched(&task.id, task.status).await? else {
                report.lost += 1;
                continue;
            };

            let outcome = self.attempt(target, &task, contract, &schedule).await?;
            if self
                .store
                .complete_task(&task.id, &outcome.to_update(now_utc()))
                .await?
            {
                report.record(&outcome);
            } else {
                report.lost += 1;
            }

            if let Some(failure) = outcome.failure() {
                tracing::warn!(
                    target = %target.name,
                    task_id = %task.id,
                    attempt = task.attempts,
                    kind = %failure.kind,
                    status = %outcome.status(),
                    error = %failure.message,
                    "delivery attempt failed"
                );
                if let Some(breach) = budget.record(failure.kind) {
                    tracing::warn!(
                        target = %target.name,
                        kind = %breach.kind,
                        count = breach.count,
                        max = breach.max,
                        error = %failure.message,
                        "error budget exceeded, abandoning target batch"
                    );
                    report.budget_breach = Some(breach);
                    break;
                }
            }
            if outcome.stops_run() {
                tracing::warn!(
                    target = %target.name,
                    task_id = %task.id,
                    "delivery contract stopped the run"
                );
                report.stopped_by_contract = true;
                break;
            }

            if matches!(outcome, TaskOutcome::Success { .. }) && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        tracing::info!(
            target = %target.name,
            published = report.published,
            skipped = report.skipped,
            deferred = report.deferred,
            failed = report.failed,
            source_deleted = report.source_deleted,
            "target publish finished"
        );
        Ok(report)
    }

    /// Publish one dispatched task and decide how it settles.
    async fn attempt(
        &self,
        target: &DeliveryTarget,
        task: &DeliveryTask,
        contract: &dyn DeliveryContract,
        schedule: &RetrySchedule,
    ) -> Result<TaskOutcome, PublishError> {
        let Some(hash) = self.task_hash(task).await? else {
            return Ok(TaskOutcome::Failed(DeliveryFailure::new(
                ErrorKind::Data,
                "hash record no longer exists",
            )));
        };
        if hash.is_tombstoned() {
            return Ok(TaskOutcome::SourceDeleted);
        }

        let entity = match self.registry.load(&hash.entity_ref()).await {
            Ok(Some(entity)) => entity,
            Ok(None) => return Ok(TaskOutcome::SourceDeleted),
            Err(HashError::UnknownEntityType(entity_type)) => {
                return Ok(TaskOutcome::Failed(DeliveryFailure::new(
                    ErrorKind::Data,
                    format!("no entity source registered for '{entity_type}'"),
                )));
            }
            Err(error) => {
                let error = DeliveryError::Other(anyhow::Error::new(error));
                return Ok(on_error(task, contract, schedule, &error));
            }
        };

        let ctx = DeliveryContext {
            target,
            task,
            hash: &hash,
            entity: &*entity,
        };
        let result: Result<Option<bool>, DeliveryError> = async {
            if !contract.should_publish(&ctx).await? {
                return Ok(None);
            }
            let payload = contract.build_payload(&ctx).await?;
            contract.deliver(&ctx, &payload).await.map(Some)
        }
        .await;

        Ok(match result {
            Ok(None) => TaskOutcome::Skipped,
            Ok(Some(true)) => TaskOutcome::Success {
                hash: hash.effective_hash().to_string(),
            },
            Ok(Some(false)) => {
                let failure = DeliveryFailure::new(ErrorKind::Data, "target declined the payload");
                match retry_at(task, contract, schedule) {
                    Some(retry_at) => TaskOutcome::Deferred { failure, retry_at },
                    None => TaskOutcome::Failed(failure),
                }
            }
            Err(error) => on_error(task, contract, schedule, &error),
        })
    }

    async fn task_hash(&self, task: &DeliveryTask) -> Result<Option<HashRecord>, PublishError> {
        let Some(hash_id) = task.hash_id.as_deref() else {
            return Ok(None);
        };
        match self.store.get_hash(hash_id).await {
            Ok(hash) => Ok(Some(hash)),
            Err(DatabaseError::NoResult) => Ok(None),
            Err(error) => Err(error.into()),
        }
    }

    /// Operator action: return every failed task of the named target to `pending`.
    ///
    /// # Errors
    ///
    /// `DatabaseError::NoResult` if no target has that name.
    pub async fn requeue_failed(&self, target_name: &str) -> Result<u64, PublishError> {
        let target = self
            .store
            .get_target_by_name(target_name)
            .await?
            .ok_or(DatabaseError::NoResult)?;
        Ok(self.store.requeue_failed(&target.id).await?)
    }

    /// Whether any task is due now, for hosts deciding when to call [`Self::run`].
    ///
    /// # Errors
    ///
    /// Store failures.
    pub async fn has_due_work(&self) -> Result<bool, PublishError> {
        Ok(self.store.has_due_tasks(now_utc()).await?)
    }
}

fn on_error(
    task: &DeliveryTask,
    contract: &dyn DeliveryContract,
    schedule: &RetrySchedule,
    error: &DeliveryError,
) -> TaskOutcome {
    let failure = DeliveryFailure::from(error);
    match contract.classify_exception(error) {
        Disposition::FailRecord => TaskOutcome::Failed(failure),
        Disposition::DeferRecord => match retry_at(task, contract, schedule) {
            Some(retry_at) => TaskOutcome::Deferred { failure, retry_at },
            None => TaskOutcome::Failed(failure),
        },
        Disposition::StopJob => TaskOutcome::StopRun {
            retry_at: retry_at(task, contract, schedule),
            failure,
        },
    }
}

/// When a deferred task becomes due again, or `None` if retries are exhausted.
fn retry_at(
    task: &DeliveryTask,
    contract: &dyn DeliveryContract,
    schedule: &RetrySchedule,
) -> Option<DateTime<Utc>> {
    match schedule.decide(task.attempts, contract.max_attempts()) {
        RetryDecision::RetryAfter(after) => chrono::Duration::from_std(after)
            .ok()
            .map(|after| now_utc() + after),
        RetryDecision::GiveUp => None,
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ripple_core::enums::DeliveryStatus;

    #[test]
    fn report_counts_by_outcome() {
        let mut report = TargetReport::new("search");
        let failure = DeliveryFailure::new(ErrorKind::Infrastructure, "down");
        report.record(&TaskOutcome::Success { hash: "h".into() });
        report.record(&TaskOutcome::Skipped);
        report.record(&TaskOutcome::StopRun {
            failure: failure.clone(),
            retry_at: Some(Utc::now()),
        });
        report.record(&TaskOutcome::StopRun {
            failure,
            retry_at: None,
        });
        assert_eq!(report.published, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.settled(), 4);
        assert!(!report.stopped());
        assert_eq!(
            report.to_string(),
            "search: 1 published, 1 skipped, 1 deferred, 1 failed, 0 source_deleted"
        );
    }

    #[test]
    fn panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }

    #[test]
    fn lease_held_report_is_empty() {
        let report = RunReport::lease_held();
        assert!(report.skipped);
        assert_eq!(report.settled(), 0);
        assert!(report.target("anything").is_none());
        assert_eq!(DeliveryStatus::Published, TaskOutcome::Skipped.status());
    }
}
