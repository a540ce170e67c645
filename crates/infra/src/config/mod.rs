//! `Config` sources: `FASTBREAK_*` environment variables, then a TOML or
//! JSON file found on the probe path.

pub mod loader;

pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
