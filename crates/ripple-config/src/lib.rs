//! # ripple-config
//!
//! Layered configuration loading for Ripple using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`RIPPLE_*` prefix, `__` as separator)
//! 2. Project-level `.ripple/config.toml`
//! 3. User-level `~/.config/ripple/config.toml`
//! 4. Built-in defaults
//!
//! # Environment Variable Mapping
//!
//! Figment maps `RIPPLE_PUBLISH__LEASE_TTL_SECS` -> `publish.lease_ttl_secs`,
//! `RIPPLE_HASHING__BATCH_SIZE` -> `hashing.batch_size`, etc.
//!
//! # Usage
//!
//! ```no_run
//! use ripple_config::RippleConfig;
//!
//! let config = RippleConfig::load_with_dotenv().expect("config");
//! println!("database: {}", config.database.path);
//! ```

mod database;
mod error;
mod hashing;
mod publish;

pub use database::DatabaseConfig;
pub use error::ConfigError;
pub use hashing::HashingConfig;
pub use publish::PublishConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RippleConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub publish: PublishConfig,
}

impl RippleConfig {
    /// Load configuration from all sources (TOML files + environment variables).
    ///
    /// Does NOT call `dotenvy` -- use [`Self::load_with_dotenv`] for `.env` support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if extraction fails or a value is out of range.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(&Self::figment())
    }

    /// Load configuration with `.env` file support.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if extraction fails or a value is out of range.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_dotenv_from_workspace();
        Self::load()
    }

    /// Extract and validate a config from an arbitrary figment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if extraction fails or a value is out of range.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can inspect the figment or add providers on top.
    #[must_use]
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = PathBuf::from(".ripple/config.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed("RIPPLE_").split("__"))
    }

    /// Reject values the scheduler cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("publish.lease_ttl_secs", self.publish.lease_ttl_secs == 0),
            ("publish.run_timeout_secs", self.publish.run_timeout_secs == 0),
            ("publish.lease_key", self.publish.lease_key.trim().is_empty()),
            ("hashing.batch_size", self.hashing.batch_size == 0),
            ("database.path", self.database.path.trim().is_empty()),
        ];
        for (field, invalid) in checks {
            if invalid {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must not be zero or empty".to_string(),
                });
            }
        }
        Ok(())
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ripple").join("config.toml"))
    }

    /// Load `.env` from the workspace root, walking up from `CARGO_MANIFEST_DIR`.
    /// Silently does nothing if no `.env` is found.
    fn load_dotenv_from_workspace() {
        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let mut dir = PathBuf::from(manifest_dir);
            // crate -> crates/ -> workspace root
            for _ in 0..3 {
                let env_path = dir.join(".env");
                if env_path.exists() {
                    let _ = dotenvy::from_path(&env_path);
                    return;
                }
                if !dir.pop() {
                    break;
                }
            }
        }

        let _ = dotenvy::dotenv();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = RippleConfig::default();
        config.validate().unwrap();
        assert_eq!(config.hashing.batch_size, 500);
        assert_eq!(config.publish.lease_key, "ripple:publish");
    }

    #[test]
    fn figment_builds_without_files() {
        let config: RippleConfig = RippleConfig::figment()
            .extract()
            .expect("should extract defaults");
        assert_eq!(config.publish.default_batch_size, 50);
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let mut config = RippleConfig::default();
        config.publish.lease_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "publish.lease_ttl_secs"
        ));
    }
}
