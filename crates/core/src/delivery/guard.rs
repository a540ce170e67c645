//! Per-channel resilience guard
//!
//! Each channel owns exactly one bulkhead and one circuit breaker. A
//! delivery acquires a bulkhead slot first, then asks the breaker, then
//! calls the adapter.

use std::future::Future;
use std::sync::Arc;

use fastbreak_common::error::CommonError;
use fastbreak_common::resilience::{
    Bulkhead, BulkheadStats, CircuitBreaker, CircuitSnapshot, ConfigResult, EventSink,
    ResilienceError, TokioClock,
};
use fastbreak_domain::{Channel, ChannelLimits};

use super::errors::DeliveryError;
use super::settings::{bulkhead_config, circuit_breaker_config};

/// Health view of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHealth {
    pub channel: Channel,
    pub circuit: CircuitSnapshot,
    pub bulkhead: BulkheadStats,
}

/// Bulkhead and circuit breaker pair protecting one channel
#[derive(Debug, Clone)]
pub struct ChannelGuard {
    channel: Channel,
    bulkhead: Bulkhead,
    breaker: CircuitBreaker<TokioClock>,
}

impl ChannelGuard {
    pub fn new(
        channel: Channel,
        limits: &ChannelLimits,
        sink: Arc<dyn EventSink>,
    ) -> ConfigResult<Self> {
        let name = channel.to_string();
        let bulkhead =
            Bulkhead::with_event_sink(name.clone(), bulkhead_config(limits)?, Arc::clone(&sink))?;
        let breaker =
            CircuitBreaker::with_clock(name, circuit_breaker_config(limits)?, TokioClock)?
                .with_event_sink(sink);
        Ok(Self { channel, bulkhead, breaker })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn breaker(&self) -> &CircuitBreaker<TokioClock> {
        &self.breaker
    }

    pub fn bulkhead(&self) -> &Bulkhead {
        &self.bulkhead
    }

    /// Run one delivery through the bulkhead and the breaker
    ///
    /// Guard rejections come back as the matching [`DeliveryError`] variant;
    /// adapter errors come back unchanged.
    pub async fn run<F, Fut>(&self, deliver: F) -> Result<(), DeliveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), DeliveryError>>,
    {
        self.bulkhead
            .execute_flattened(|| self.breaker.execute(deliver))
            .await
            .map_err(|err| self.delivery_error(err))
    }

    pub fn health(&self) -> ChannelHealth {
        ChannelHealth {
            channel: self.channel,
            circuit: self.breaker.get_state(),
            bulkhead: self.bulkhead.get_stats(),
        }
    }

    fn delivery_error(&self, err: ResilienceError<DeliveryError>) -> DeliveryError {
        let channel = self.channel;
        match err {
            ResilienceError::OperationFailed { source } => source,
            ResilienceError::CircuitOpen { retry_after } => {
                DeliveryError::CircuitOpen { channel, retry_after }
            }
            ResilienceError::BulkheadFull { capacity } => {
                DeliveryError::BulkheadFull { channel, capacity }
            }
            ResilienceError::Timeout { timeout } => DeliveryError::Timeout { channel, timeout },
            ResilienceError::RetriesExhausted { last, .. } => self.delivery_error(*last),
            ResilienceError::InvalidConfiguration { message } => {
                DeliveryError::Common(CommonError::config(message))
            }
        }
    }
}
