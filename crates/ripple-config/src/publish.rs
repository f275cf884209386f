//! Publish scheduler settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_lease_key() -> String {
    "ripple:publish".to_string()
}

const fn default_lease_ttl_secs() -> u64 {
    300
}

const fn default_run_timeout_secs() -> u64 {
    600
}

const fn default_dispatch_delay_ms() -> u64 {
    1000
}

const fn default_stale_dispatch_secs() -> u64 {
    900
}

const fn default_batch_size() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublishConfig {
    /// Lease key guarding the scheduler. Shared by every scheduler instance.
    #[serde(default = "default_lease_key")]
    pub lease_key: String,

    /// Lease time-to-live, in seconds. Renewed while a run is in progress.
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,

    /// Upper bound on a single scheduler invocation, in seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Pause before a self-rescheduled run when due tasks remain, in milliseconds.
    #[serde(default = "default_dispatch_delay_ms")]
    pub dispatch_delay_ms: u64,

    /// Tasks left `dispatched` longer than this are returned to `pending`.
    #[serde(default = "default_stale_dispatch_secs")]
    pub stale_dispatch_secs: u64,

    /// Batch size used by delivery contracts that do not override it.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            lease_key: default_lease_key(),
            lease_ttl_secs: default_lease_ttl_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            dispatch_delay_ms: default_dispatch_delay_ms(),
            stale_dispatch_secs: default_stale_dispatch_secs(),
            default_batch_size: default_batch_size(),
        }
    }
}

impl PublishConfig {
    #[must_use]
    pub const fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    #[must_use]
    pub const fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    #[must_use]
    pub const fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    #[must_use]
    pub const fn stale_dispatch(&self) -> Duration {
        Duration::from_secs(self.stale_dispatch_secs)
    }
}
