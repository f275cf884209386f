//! Delivery contracts: how each target publishes a task.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ripple_core::entities::{DeliveryTarget, DeliveryTask, HashRecord};
use ripple_core::enums::Disposition;
use ripple_hash::TrackedEntity;
use serde_json::Value;

use crate::error::DeliveryError;
use crate::retry::RetrySchedule;

/// Everything a contract sees while publishing one task.
#[derive(Clone, Copy)]
pub struct DeliveryContext<'a> {
    pub target: &'a DeliveryTarget,
    pub task: &'a DeliveryTask,
    pub hash: &'a HashRecord,
    pub entity: &'a dyn TrackedEntity,
}

/// Per-target delivery behavior.
///
/// Only [`build_payload`](Self::build_payload) and [`deliver`](Self::deliver)
/// are required. The defaults publish every task, take the configured batch
/// size, retry on the default schedule, and never trip an error budget.
#[async_trait]
pub trait DeliveryContract: Send + Sync {
    /// Whether the task should be published at all. `false` settles it as
    /// published with `{"skipped": true}` metadata.
    async fn should_publish(&self, _ctx: &DeliveryContext<'_>) -> Result<bool, DeliveryError> {
        Ok(true)
    }

    async fn build_payload(&self, ctx: &DeliveryContext<'_>) -> Result<Value, DeliveryError>;

    /// Send the payload. `Ok(false)` means the target declined it for now.
    async fn deliver(
        &self,
        ctx: &DeliveryContext<'_>,
        payload: &Value,
    ) -> Result<bool, DeliveryError>;

    /// Attempts before a task fails outright. 0 leaves the limit to the retry table.
    fn max_attempts(&self) -> u32 {
        0
    }

    /// Tasks per run. `None` uses `publish.default_batch_size`; `Some(0)` is unlimited.
    fn batch_size(&self) -> Option<u32> {
        None
    }

    /// Pause after each successful delivery, in milliseconds.
    fn inter_task_delay_ms(&self) -> u64 {
        0
    }

    fn retry_intervals(&self) -> RetrySchedule {
        RetrySchedule::default()
    }

    fn classify_exception(&self, error: &DeliveryError) -> Disposition {
        if error.kind().is_retryable() {
            Disposition::DeferRecord
        } else {
            Disposition::FailRecord
        }
    }

    /// Validation errors tolerated per run. 0 disables the budget.
    fn max_validation_errors(&self) -> u32 {
        0
    }

    /// Infrastructure (and unknown) errors tolerated per run. 0 disables the budget.
    fn max_infrastructure_errors(&self) -> u32 {
        0
    }
}

/// Delivery contracts keyed by target name.
#[derive(Default, Clone)]
pub struct ContractRegistry {
    contracts: HashMap<String, Arc<dyn DeliveryContract>>,
}

impl ContractRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target_name: impl Into<String>, contract: Arc<dyn DeliveryContract>) {
        let target_name = target_name.into();
        if self
            .contracts
            .insert(target_name.clone(), contract)
            .is_some()
        {
            tracing::warn!(target = %target_name, "replaced delivery contract");
        }
    }

    #[must_use]
    pub fn with_contract(
        mut self,
        target_name: impl Into<String>,
        contract: Arc<dyn DeliveryContract>,
    ) -> Self {
        self.register(target_name, contract);
        self
    }

    #[must_use]
    pub fn get(&self, target_name: &str) -> Option<&Arc<dyn DeliveryContract>> {
        self.contracts.get(target_name)
    }

    #[must_use]
    pub fn target_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.contracts.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl DeliveryContract for Echo {
        async fn build_payload(&self, ctx: &DeliveryContext<'_>) -> Result<Value, DeliveryError> {
            Ok(serde_json::json!({ "hash": ctx.hash.effective_hash() }))
        }

        async fn deliver(
            &self,
            _ctx: &DeliveryContext<'_>,
            _payload: &Value,
        ) -> Result<bool, DeliveryError> {
            Ok(true)
        }
    }

    #[test]
    fn defaults() {
        let echo = Echo;
        assert_eq!(echo.max_attempts(), 0);
        assert_eq!(echo.batch_size(), None);
        assert_eq!(echo.inter_task_delay_ms(), 0);
        assert_eq!(echo.retry_intervals(), RetrySchedule::default());
        assert_eq!(echo.max_validation_errors(), 0);
        assert_eq!(echo.max_infrastructure_errors(), 0);
    }

    #[test]
    fn default_classification_follows_retryability() {
        let echo = Echo;
        assert_eq!(
            echo.classify_exception(&DeliveryError::Timeout(Duration::from_secs(1))),
            Disposition::DeferRecord
        );
        assert_eq!(
            echo.classify_exception(&DeliveryError::Other(anyhow::anyhow!("?"))),
            Disposition::DeferRecord
        );
        assert_eq!(
            echo.classify_exception(&DeliveryError::MissingData("empty".into())),
            Disposition::FailRecord
        );
        assert_eq!(
            echo.classify_exception(&DeliveryError::Validation {
                message: "bad".into(),
                response_code: Some(400),
            }),
            Disposition::FailRecord
        );
    }

    #[test]
    fn registry_lookup_by_target_name() {
        let registry = ContractRegistry::new()
            .with_contract("search", Arc::new(Echo))
            .with_contract("cdn", Arc::new(Echo));
        assert!(registry.get("search").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.target_names(), vec!["cdn", "search"]);
    }
}
