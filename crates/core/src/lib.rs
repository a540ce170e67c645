//! # FastBreak Core
//!
//! Delivery engine business logic - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for channel adapters, queue persistence,
//!   the delivery audit log and user channel preferences
//! - The delivery error taxonomy
//! - The priority delivery queue
//! - Per-channel resilience guards and the delivery orchestrator
//!
//! ## Architecture Principles
//! - Only depends on `fastbreak-common` and `fastbreak-domain`
//! - No database, HTTP, or transport code
//! - All external collaborators via traits

pub mod delivery;

// Re-export specific items to avoid ambiguity
pub use delivery::errors::{DeliveryError, OrchestratorError, QueueError};
pub use delivery::ports::{
    ChannelAdapter, ChannelPreferences, DeliveryRecordRepository, QueueStore, StoredJob,
};
pub use delivery::{
    ChannelGuard, ChannelHealth, DeliveryOrchestrator, DeliveryOrchestratorBuilder, DeliveryQueue,
    JobOutcome, QueueConfig, QueueStats,
};
