//! Resilience wrapper for health probes
//!
//! `CircuitBreakerCommand` composes a tower stack around a command body:
//!
//! ```text
//! isolation permit → circuit breaker → timeout → body
//! ```
//!
//! - the isolation pool is a semaphore shared by every command with the
//!   same pool key; a call finding no free permit is rejected, never queued,
//!   and does not count against the breaker
//! - the breaker (`tower-resilience-circuitbreaker`) opens on the error rate
//!   of a time-based window, waits `sleep_window`, then lets one trial through
//! - the body is dropped when the timeout expires; a panic inside it is
//!   caught and reported as an isolation failure
//!
//! Each call runs on its own tokio task, so the breaker always sees the
//! outcome even when the caller gives up waiting.

use crate::error::HealthError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tower::timeout::error::Elapsed;
use tower::util::BoxService;
use tower::{service_fn, BoxError, Service, ServiceBuilder, ServiceExt};
use tower_resilience_circuitbreaker::{CircuitBreakerError, CircuitBreakerLayer, SlidingWindowType};
use tracing::{debug, warn};

/// Keys and thresholds of one command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSetter {
    pub group_key: String,
    pub command_key: String,
    pub pool_key: String,
    pub timeout: Duration,
    pub pool_size: usize,
    pub request_volume_threshold: u32,
    pub error_threshold_percentage: u8,
    pub sleep_window: Duration,
    pub rolling_window: Duration,
}

/// Isolation pools keyed by pool key.
///
/// The first command registered under a key fixes the pool size.
#[derive(Debug, Clone, Default)]
pub struct IsolationPools {
    pools: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl IsolationPools {
    pub fn semaphore(&self, pool_key: &str, size: usize) -> Arc<Semaphore> {
        self.pools
            .lock()
            .entry(pool_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(size.max(1))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }
}

type Body<T> = BoxFuture<'static, Result<T, HealthError>>;

pub struct CircuitBreakerCommand<T> {
    setter: Arc<CommandSetter>,
    pool: Arc<Semaphore>,
    service: Arc<tokio::sync::Mutex<BoxService<Body<T>, T, HealthError>>>,
}

impl<T> Clone for CircuitBreakerCommand<T> {
    fn clone(&self) -> Self {
        Self {
            setter: self.setter.clone(),
            pool: self.pool.clone(),
            service: self.service.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> CircuitBreakerCommand<T> {
    /// Command with a pool of its own.
    pub fn new(setter: CommandSetter) -> Self {
        Self::with_pools(setter, &IsolationPools::default())
    }

    /// Command isolated in the pool registered under `setter.pool_key`.
    pub fn with_pools(setter: CommandSetter, pools: &IsolationPools) -> Self {
        let pool = pools.semaphore(&setter.pool_key, setter.pool_size);

        let breaker = CircuitBreakerLayer::builder()
            .name(setter.command_key.as_str())
            .failure_rate_threshold(f64::from(setter.error_threshold_percentage) / 100.0)
            .sliding_window_type(SlidingWindowType::TimeBased)
            .sliding_window_duration(setter.rolling_window)
            .minimum_number_of_calls(setter.request_volume_threshold.max(1) as usize)
            .wait_duration_in_open(setter.sleep_window)
            .permitted_calls_in_half_open(1)
            .build();

        let open_key = setter.command_key.clone();
        let timeout_key = setter.command_key.clone();
        let timeout_ms = setter.timeout.as_millis() as u64;

        let service = ServiceBuilder::new()
            .map_err(move |err: CircuitBreakerError<HealthError>| match err {
                CircuitBreakerError::Inner(err) => err,
                _ => {
                    debug!(command = %open_key, "circuit open, short-circuiting");
                    HealthError::CircuitOpen(open_key.clone())
                }
            })
            .layer(breaker.for_request::<Body<T>>())
            .map_err(move |err: BoxError| elapsed_or(err, &timeout_key, timeout_ms))
            .timeout(setter.timeout)
            .service(service_fn(|body: Body<T>| async move {
                AssertUnwindSafe(body)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HealthError::Isolation(panic_message(panic))))
            }));

        Self {
            setter: Arc::new(setter),
            pool,
            service: Arc::new(tokio::sync::Mutex::new(BoxService::new(service))),
        }
    }

    pub fn group_key(&self) -> &str {
        &self.setter.group_key
    }

    pub fn command_key(&self) -> &str {
        &self.setter.command_key
    }

    pub fn pool_key(&self) -> &str {
        &self.setter.pool_key
    }

    /// Runs `body` under isolation, timeout and circuit breaking.
    pub async fn execute<Fut>(&self, body: Fut) -> Result<T, HealthError>
    where
        Fut: Future<Output = Result<T, HealthError>> + Send + 'static,
    {
        let permit = self.pool.clone().try_acquire_owned().map_err(|_| {
            warn!(
                group = %self.setter.group_key,
                command = %self.setter.command_key,
                "pool {} exhausted, rejecting execution",
                self.setter.pool_key
            );
            HealthError::Rejected(self.setter.pool_key.clone())
        })?;

        let service = self.service.clone();
        let body: Body<T> = Box::pin(body);

        let call = tokio::spawn(async move {
            let _permit = permit;
            let response = {
                let mut service = service.lock().await;
                service.ready().await?.call(body)
            };
            response.await
        });

        match call.await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(HealthError::Isolation(join_err.to_string())),
        }
    }
}

fn elapsed_or(err: BoxError, command: &str, timeout_ms: u64) -> HealthError {
    if err.is::<Elapsed>() {
        warn!(command, "execution timed out after {timeout_ms}ms");
        return HealthError::Timeout {
            command: command.to_string(),
            timeout_ms,
        };
    }
    into_health_error(err)
}

fn into_health_error(err: BoxError) -> HealthError {
    match err.downcast::<HealthError>() {
        Ok(err) => *err,
        Err(other) => HealthError::Isolation(other.to_string()),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return msg.to_string();
    }
    match panic.downcast::<String>() {
        Ok(msg) => *msg,
        Err(_) => "command body panicked".into(),
    }
}
