//! # FastBreak Infrastructure
//!
//! Infrastructure implementations of core delivery ports.
//!
//! This crate contains:
//! - Configuration loading (environment, `.env`, TOML/JSON files)
//! - Tracing subscriber bootstrap
//! - In-memory and JSON-file backed stores
//! - The delivery worker pool
//!
//! ## Architecture
//! - Implements traits defined in `fastbreak-core`
//! - Depends on `fastbreak-domain`, `fastbreak-common` and `fastbreak-core`
//! - Contains all "impure" code (filesystem, environment, task spawning)

pub mod config;
pub mod delivery;
pub mod errors;
pub mod observability;
pub mod stores;

// Re-export commonly used items
pub use delivery::{DeliveryWorkerPool, WorkerError, WorkerPoolConfig, WorkerResult};
pub use errors::InfraError;
pub use observability::logging::init_tracing;
pub use stores::{
    JsonFileQueueStore, MemoryDeliveryRecordRepository, MemoryQueueStore,
    StaticChannelPreferences,
};
