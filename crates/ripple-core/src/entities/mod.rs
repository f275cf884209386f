//! Persisted record structs.
//!
//! Each struct maps to a table created by `ripple-db` migrations. All derive
//! `Serialize`, `Deserialize`, and `JsonSchema` so operators can export and
//! validate them.

mod delivery_target;
mod delivery_task;
mod dependency_link;
mod hash_record;
mod lease;

pub use delivery_target::DeliveryTarget;
pub use delivery_task::DeliveryTask;
pub use dependency_link::{DependencyLink, NewDependencyLink};
pub use hash_record::HashRecord;
pub use lease::Lease;
