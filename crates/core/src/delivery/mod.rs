//! Multi-channel notification delivery
//!
//! A [`DeliveryOrchestrator`] takes notification requests, turns them into
//! jobs on a [`DeliveryQueue`], and drives each job through its channel set.
//! Every channel is reached through its own [`ChannelGuard`] (bulkhead in
//! front of a circuit breaker). Failed channels are carried into the next
//! pass by re-enqueueing the job with a backoff delay until the job's retry
//! budget runs out.

pub mod errors;
pub mod guard;
pub mod orchestrator;
pub mod ports;
pub mod queue;
pub mod settings;

pub use guard::{ChannelGuard, ChannelHealth};
pub use orchestrator::{DeliveryOrchestrator, DeliveryOrchestratorBuilder, JobOutcome};
pub use queue::{DeliveryQueue, QueueConfig, QueueStats};
