//! Observability infrastructure
//!
//! Installs the process-wide tracing subscriber. Resilience events are
//! emitted through `fastbreak_common::resilience::TracingEventSink`, so the
//! subscriber installed here also carries circuit breaker and bulkhead
//! transitions.

pub mod logging;
