//! # ripple-publish
//!
//! Delivers changed hashes to external targets.
//!
//! A [`scheduler::PublishScheduler`] takes the scheduler lease, then drains
//! each target's due delivery tasks through the [`contract::DeliveryContract`]
//! registered under the target's name. Failures are classified into error
//! kinds, deferred along the contract's [`retry::RetrySchedule`], and counted
//! against per-run [`budget::ErrorBudget`]s.

pub mod budget;
pub mod contract;
pub mod error;
pub mod outcome;
pub mod retry;
pub mod scheduler;
pub mod telemetry;

pub use contract::{ContractRegistry, DeliveryContext, DeliveryContract};
pub use error::{DeliveryError, PublishError};
pub use outcome::{DeliveryFailure, TaskOutcome};
pub use retry::RetrySchedule;
pub use scheduler::{PublishScheduler, RunReport, TargetReport};
