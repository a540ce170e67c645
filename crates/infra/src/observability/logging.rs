//! Tracing subscriber bootstrap

use fastbreak_domain::{FastBreakError, LoggingConfig, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter for `config`
///
/// `RUST_LOG` wins over the configured directive string.
///
/// # Errors
/// Returns `FastBreakError::Config` if the configured directives do not parse.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        FastBreakError::Config(format!("Invalid log filter '{}': {e}", config.filter))
    })
}

/// Install the global tracing subscriber
///
/// Call once at startup. JSON lines when `config.json` is set, the compact
/// human-readable format otherwise.
///
/// # Errors
/// Returns `FastBreakError::Config` if the filter is invalid or a global
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    installed.map_err(|e| FastBreakError::Config(format!("Failed to install subscriber: {e}")))?;
    tracing::debug!(filter = %config.filter, json = config.json, "tracing initialised");
    Ok(())
}
