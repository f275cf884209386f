//! Tracing setup for hosts that embed the scheduler.

/// Environment variable holding an `EnvFilter` directive, e.g. `ripple_publish=debug`.
pub const LOG_ENV: &str = "RIPPLE_LOG";

/// Install a global fmt subscriber.
///
/// `RIPPLE_LOG` wins when set; otherwise the level is `debug` when `verbose`
/// and `info` when not.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_an_error() {
        let _ = init_tracing(false);
        assert!(init_tracing(true).is_err());
    }
}
