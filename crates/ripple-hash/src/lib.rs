//! # ripple-hash
//!
//! Change detection for tracked entities.
//!
//! - [`fingerprint`]: canonical attribute fingerprints (BLAKE3, 128-bit hex)
//! - [`composite`]: composite hashes folded over declared dependency graphs
//! - [`detector`]: single-entity and bulk change detection
//! - [`propagator`]: breadth-first invalidation of ancestors
//! - [`processor`]: bulk recomputation feeding the delivery queue
//! - [`orphans`]: tombstoning and purging records whose entities are gone
//!
//! Entities are reached through [`source::EntitySource`] implementations
//! registered in an [`source::EntityRegistry`]. All operations hang off
//! [`HashEngine`].

pub mod composite;
pub mod detector;
pub mod entity;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod orphans;
pub mod processor;
pub mod propagator;
pub mod source;

use std::sync::Arc;

use ripple_config::HashingConfig;
use ripple_db::service::RippleService;

pub use entity::TrackedEntity;
pub use error::HashError;
pub use source::{EntityRegistry, EntitySource};

/// Hashing engine over a registry of entity sources and the hash store.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct HashEngine {
    registry: Arc<EntityRegistry>,
    store: Arc<RippleService>,
    config: HashingConfig,
}

impl HashEngine {
    #[must_use]
    pub const fn new(
        registry: Arc<EntityRegistry>,
        store: Arc<RippleService>,
        config: HashingConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &RippleService {
        &self.store
    }

    #[must_use]
    pub const fn config(&self) -> &HashingConfig {
        &self.config
    }

    /// Page size for scans, never zero.
    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1) as usize
    }
}
