//! Delivery runtime: the worker pool that drains the delivery queue

pub mod error;
pub mod worker_pool;

pub use error::{WorkerError, WorkerResult};
pub use worker_pool::{DeliveryWorkerPool, WorkerPoolConfig};
