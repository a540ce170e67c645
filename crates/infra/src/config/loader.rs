//! Configuration loader
//!
//! Loads delivery engine configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Reads a `.env` file into the process environment when one exists
//! 2. Attempts to load from `FASTBREAK_*` environment variables
//! 3. If a required variable is missing, falls back to loading from file
//! 4. Probes multiple paths for config files (JSON or TOML)
//! 5. Validates the result before handing it out
//!
//! ## Environment Variables
//! Required:
//! - `FASTBREAK_WORKER_COUNT`: Number of delivery workers
//! - `FASTBREAK_MAX_RETRIES`: Job-level re-enqueue cap
//!
//! Optional (defaults from `fastbreak_domain::constants`):
//! - `FASTBREAK_POLL_INTERVAL_MS`, `FASTBREAK_WORKER_JOIN_TIMEOUT_MS`
//! - `FASTBREAK_BASE_RETRY_DELAY_MS`, `FASTBREAK_QUEUE_CAPACITY`,
//!   `FASTBREAK_STATUS_RETENTION`
//! - `FASTBREAK_RETRY_MAX_ATTEMPTS`, `FASTBREAK_RETRY_BASE_DELAY_MS`,
//!   `FASTBREAK_RETRY_MAX_DELAY_MS`, `FASTBREAK_RETRY_BACKOFF_MULTIPLIER`,
//!   `FASTBREAK_RETRY_JITTER` (true/false)
//! - `FASTBREAK_CHANNEL_MAX_CONCURRENT`, `FASTBREAK_CHANNEL_MAX_QUEUE_DEPTH`,
//!   `FASTBREAK_CHANNEL_QUEUE_TIMEOUT_MS`, `FASTBREAK_CIRCUIT_FAILURE_THRESHOLD`,
//!   `FASTBREAK_CIRCUIT_OPEN_TIMEOUT_MS` (applied to every channel)
//! - `FASTBREAK_LOG_FILTER`, `FASTBREAK_LOG_JSON` (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.json` or `./config.toml` (current working directory)
//! 2. `./fastbreak.json` or `./fastbreak.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. `../../config.json` or `../../config.toml` (grandparent directory)
//! 5. Relative to executable location
//!
//! Per-channel overrides (`[channels.overrides.<channel>]`) are only
//! available through a config file.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fastbreak_domain::constants::ENV_PREFIX;
use fastbreak_domain::{
    ChannelLimits, ChannelsConfig, Config, DeliveryConfig, FastBreakError, LoggingConfig, Result,
    RetryConfig,
};

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If any required
/// variables are missing, falls back to loading from a config file.
///
/// # Errors
/// Returns `FastBreakError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - The loaded configuration fails validation
pub fn load() -> Result<Config> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)?
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// The required variables must be present; every optional variable falls
/// back to its default.
///
/// # Errors
/// Returns `FastBreakError::Config` if required variables are missing
/// or any variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let defaults = Config::default();

    let delivery = DeliveryConfig {
        worker_count: env_required("WORKER_COUNT")?,
        max_retries: env_required("MAX_RETRIES")?,
        poll_interval_ms: env_parse("POLL_INTERVAL_MS", defaults.delivery.poll_interval_ms)?,
        worker_join_timeout_ms: env_parse(
            "WORKER_JOIN_TIMEOUT_MS",
            defaults.delivery.worker_join_timeout_ms,
        )?,
        base_retry_delay_ms: env_parse(
            "BASE_RETRY_DELAY_MS",
            defaults.delivery.base_retry_delay_ms,
        )?,
        queue_capacity: env_parse("QUEUE_CAPACITY", defaults.delivery.queue_capacity)?,
        status_retention: env_parse("STATUS_RETENTION", defaults.delivery.status_retention)?,
    };

    let retry = RetryConfig {
        max_attempts: env_parse("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
        base_delay_ms: env_parse("RETRY_BASE_DELAY_MS", defaults.retry.base_delay_ms)?,
        max_delay_ms: env_parse("RETRY_MAX_DELAY_MS", defaults.retry.max_delay_ms)?,
        backoff_multiplier: env_parse(
            "RETRY_BACKOFF_MULTIPLIER",
            defaults.retry.backoff_multiplier,
        )?,
        jitter: env_bool("RETRY_JITTER", defaults.retry.jitter),
    };

    let limits = defaults.channels.default;
    let channels = ChannelsConfig {
        default: ChannelLimits {
            max_concurrent: env_parse("CHANNEL_MAX_CONCURRENT", limits.max_concurrent)?,
            max_queue_depth: env_parse("CHANNEL_MAX_QUEUE_DEPTH", limits.max_queue_depth)?,
            queue_timeout_ms: env_optional("CHANNEL_QUEUE_TIMEOUT_MS")?,
            failure_threshold: env_parse("CIRCUIT_FAILURE_THRESHOLD", limits.failure_threshold)?,
            open_timeout_ms: env_parse("CIRCUIT_OPEN_TIMEOUT_MS", limits.open_timeout_ms)?,
        },
        overrides: Default::default(),
    };

    let logging = LoggingConfig {
        filter: env_optional("LOG_FILTER")?.unwrap_or(defaults.logging.filter),
        json: env_bool("LOG_JSON", defaults.logging.json),
    };

    Ok(Config { delivery, retry, channels, logging })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
/// Sections and fields missing from the file take their defaults.
///
/// # Errors
/// Returns `FastBreakError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(FastBreakError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            FastBreakError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| FastBreakError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| FastBreakError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| FastBreakError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(FastBreakError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the working directory (and up to two parents), then the
/// executable's directory. Returns the first file that exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidates_in(&cwd));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidates_in(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidates_in(dir: &Path) -> Vec<PathBuf> {
    vec![
        dir.join("config.json"),
        dir.join("config.toml"),
        dir.join("fastbreak.json"),
        dir.join("fastbreak.toml"),
        dir.join("../config.json"),
        dir.join("../config.toml"),
        dir.join("../../config.json"),
        dir.join("../../config.toml"),
    ]
}

fn env_key(name: &str) -> String {
    format!("{ENV_PREFIX}{name}")
}

/// Get required environment variable
///
/// # Errors
/// Returns `FastBreakError::Config` if the variable is not set.
fn env_var(name: &str) -> Result<String> {
    let key = env_key(name);
    std::env::var(&key).map_err(|_| {
        FastBreakError::Config(format!("Missing required environment variable: {key}"))
    })
}

fn env_required<T>(name: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    parse_value(name, &env_var(name)?)
}

fn env_optional<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(env_key(name)) {
        Ok(raw) => parse_value(name, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(env_optional(name)?.unwrap_or(default))
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| FastBreakError::Config(format!("Invalid value for {}: {e}", env_key(name))))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(env_key(name))
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
