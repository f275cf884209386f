//! Hash computation and propagation settings.

use serde::{Deserialize, Serialize};

/// Default page size for bulk detection and processing.
const fn default_batch_size() -> u32 {
    500
}

/// Default maximum number of parent hops walked by the invalidation propagator.
const fn default_propagation_depth() -> u32 {
    16
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HashingConfig {
    /// Entities fetched per page when scanning a tracked type.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Maximum parent hops per propagation pass. `0` means unbounded.
    #[serde(default = "default_propagation_depth")]
    pub propagation_depth: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            propagation_depth: default_propagation_depth(),
        }
    }
}
