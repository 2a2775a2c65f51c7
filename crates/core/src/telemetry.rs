//! Logging setup for the bot host.
//!
//! `RUST_LOG` takes precedence over the configured `[logging] level`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::LoggingConfig, error::NobotError};

/// Build the filter used by [`init`].
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(filter_directives(
        config,
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
    ))
}

fn filter_directives(config: &LoggingConfig, from_env: Option<String>) -> String {
    from_env
        .filter(|directives| !directives.trim().is_empty())
        .unwrap_or_else(|| config.level.clone())
}

/// Install the global `tracing` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), NobotError> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer)
        .try_init()
        .map_err(|error| NobotError::Telemetry(error.to_string()))?;

    tracing::info!(level = %config.level, "logging initialized");
    Ok(())
}
