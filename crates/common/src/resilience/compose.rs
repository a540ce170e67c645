//! Explicit composition of resilience layers
//!
//! Each layer takes a [`ResilientCall`] and returns a new one that wraps it:
//!
//! ```rust,ignore
//! let call = lift(move || adapter.deliver(job.clone()));
//! let call = with_circuit_breaker(call, breaker.clone());
//! let call = with_bulkhead(call, bulkhead.clone());
//! let call = with_retry(call, executor, Classified);
//! let receipt = call().await?;
//! ```
//!
//! The outermost layer runs first, so the stack above acquires a bulkhead
//! slot, then consults the breaker, then invokes the operation, and retries
//! the whole sequence on retryable failures.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use super::bulkhead::Bulkhead;
use super::circuit_breaker::CircuitBreaker;
use super::clock::Clock;
use super::error::{ResilienceError, ResilienceResult};
use super::retry::{RetryCondition, RetryError, RetryExecutor};

/// A repeatable asynchronous call guarded by zero or more resilience layers
pub type ResilientCall<T, E> =
    Arc<dyn Fn() -> BoxFuture<'static, ResilienceResult<T, E>> + Send + Sync>;

/// Turn a plain async operation into a [`ResilientCall`]
pub fn lift<F, Fut, T, E>(operation: F) -> ResilientCall<T, E>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(move || {
        let fut = operation();
        async move { fut.await.map_err(|source| ResilienceError::OperationFailed { source }) }
            .boxed()
    })
}

/// Guard `call` with a circuit breaker
pub fn with_circuit_breaker<T, E, C>(
    call: ResilientCall<T, E>,
    breaker: CircuitBreaker<C>,
) -> ResilientCall<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    C: Clock,
{
    Arc::new(move || {
        let call = Arc::clone(&call);
        let breaker = breaker.clone();
        async move { breaker.execute_flattened(|| call()).await }.boxed()
    })
}

/// Run `call` inside a bulkhead slot
pub fn with_bulkhead<T, E>(call: ResilientCall<T, E>, bulkhead: Bulkhead) -> ResilientCall<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    Arc::new(move || {
        let call = Arc::clone(&call);
        let bulkhead = bulkhead.clone();
        async move { bulkhead.execute_flattened(|| call()).await }.boxed()
    })
}

/// Retry `call` under `executor`'s policy while `condition` allows it
///
/// Exhaustion surfaces as [`ResilienceError::RetriesExhausted`]; a
/// non-retryable failure surfaces as the error itself.
pub fn with_retry<T, E, R>(
    call: ResilientCall<T, E>,
    executor: RetryExecutor,
    condition: R,
) -> ResilientCall<T, E>
where
    T: Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    R: RetryCondition<ResilienceError<E>> + Send + Sync + 'static,
{
    let executor = Arc::new(executor);
    let condition = Arc::new(condition);
    Arc::new(move || {
        let call = Arc::clone(&call);
        let executor = Arc::clone(&executor);
        let condition = Arc::clone(&condition);
        async move {
            executor.execute(|| call(), &*condition).await.map_err(|err| match err {
                RetryError::Exhausted { attempts, source } => {
                    ResilienceError::RetriesExhausted { attempts, last: Box::new(source) }
                }
                RetryError::NonRetryable { source, .. } => source,
            })
        }
        .boxed()
    })
}
