//! Integration tests for TOML configuration loading.
//!
//! Uses figment::Jail for sandboxed file and env var manipulation.

use figment::{
    Figment, Jail,
    providers::{Env, Format, Serialized, Toml},
};
use ripple_config::{ConfigError, RippleConfig};

fn jailed_figment() -> Figment {
    Figment::from(Serialized::defaults(RippleConfig::default()))
        .merge(Toml::file("config.toml"))
        .merge(Env::prefixed("RIPPLE_").split("__"))
}

#[test]
fn loads_publish_config_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[publish]
lease_key = "ripple:publish:staging"
lease_ttl_secs = 120
run_timeout_secs = 240
dispatch_delay_ms = 250
stale_dispatch_secs = 60
default_batch_size = 10
"#,
        )?;

        let config = RippleConfig::from_figment(&jailed_figment()).expect("config loads");

        assert_eq!(config.publish.lease_key, "ripple:publish:staging");
        assert_eq!(config.publish.lease_ttl_secs, 120);
        assert_eq!(config.publish.run_timeout_secs, 240);
        assert_eq!(config.publish.dispatch_delay_ms, 250);
        assert_eq!(config.publish.stale_dispatch_secs, 60);
        assert_eq!(config.publish.default_batch_size, 10);
        Ok(())
    });
}

#[test]
fn loads_hashing_and_database_config_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[database]
path = "/var/lib/ripple/state.db"

[hashing]
batch_size = 1000
propagation_depth = 0
"#,
        )?;

        let config = RippleConfig::from_figment(&jailed_figment()).expect("config loads");

        assert_eq!(config.database.path, "/var/lib/ripple/state.db");
        assert_eq!(config.hashing.batch_size, 1000);
        assert_eq!(config.hashing.propagation_depth, 0);
        // untouched section keeps defaults
        assert_eq!(config.publish.lease_ttl_secs, 300);
        Ok(())
    });
}

#[test]
fn env_overrides_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[hashing]
batch_size = 1000
"#,
        )?;
        jail.set_env("RIPPLE_HASHING__BATCH_SIZE", "25");
        jail.set_env("RIPPLE_PUBLISH__LEASE_KEY", "from-env");

        let config = RippleConfig::from_figment(&jailed_figment()).expect("config loads");

        assert_eq!(config.hashing.batch_size, 25);
        assert_eq!(config.publish.lease_key, "from-env");
        Ok(())
    });
}

#[test]
fn zero_timeout_is_rejected() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[publish]
run_timeout_secs = 0
"#,
        )?;

        let result = RippleConfig::from_figment(&jailed_figment());
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
        Ok(())
    });
}

#[test]
fn malformed_value_surfaces_figment_error() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[hashing]
batch_size = "lots"
"#,
        )?;

        let result = RippleConfig::from_figment(&jailed_figment());
        assert!(matches!(result, Err(ConfigError::Figment(_))));
        Ok(())
    });
}
