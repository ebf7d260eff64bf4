//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: testing if downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: after cooldown, taken by exactly one caller
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails (cooldown restarts)
//! ```
//!
//! # Design Decisions
//! - Per-service circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering downstream)
//! - The lock is never held across the downstream call: admission and outcome
//!   are two short critical sections, with a probe-in-flight flag between them
//! - Counters live under the same lock as the state, so a snapshot can never
//!   show an open circuit next to a success that already closed it

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::dispatch::Service;
use crate::error::BreakerError;
use crate::observability::metrics;

/// Retry hint handed out while a probe is already running.
const PROBE_RETRY_HINT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Cumulative call counters for one service.
#[derive(Debug, Clone, Default)]
struct ServiceMetrics {
    total_calls: u64,
    success_calls: u64,
    failure_calls: u64,
    last_call: Option<DateTime<Utc>>,
}

impl ServiceMetrics {
    /// Percentage with two decimals; 0 before any call.
    fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        let rate = self.success_calls as f64 / self.total_calls as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    metrics: ServiceMetrics,
}

/// How a call was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Point-in-time view of one breaker, as served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub service: Service,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub total_calls: u64,
    pub success_calls: u64,
    pub failure_calls: u64,
    pub success_rate: f64,
    pub last_call: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    service: Service,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(service: Service, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            service,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
                metrics: ServiceMetrics::default(),
            }),
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Run `op` through the breaker.
    ///
    /// Any `Err` from `op` counts as a failure. Callers that must not trip the
    /// breaker on some errors (e.g. a body that fails to decode) should return
    /// `Ok` from `op` and classify afterwards.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self
            .admit()
            .map_err(|retry_after| BreakerError::Open { retry_after })?;

        let mut guard = CallGuard {
            breaker: self,
            admission,
            settled: false,
        };

        let result = op().await;
        guard.settled = true;

        match &result {
            Ok(_) => self.on_success(admission),
            Err(_) => self.on_failure(admission),
        }
        result.map_err(BreakerError::Inner)
    }

    /// Force Closed and zero the failure counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        drop(inner);

        if previous != CircuitState::Closed {
            tracing::info!(service = %self.service, from = previous.as_str(), "Circuit breaker manually reset");
        }
        metrics::record_breaker_state(self.service, CircuitState::Closed);
    }

    pub fn status(&self) -> BreakerStatus {
        let inner = self.inner.lock();
        BreakerStatus {
            service: self.service,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            circuit_open: inner.state == CircuitState::Open,
            total_calls: inner.metrics.total_calls,
            success_calls: inner.metrics.success_calls,
            failure_calls: inner.metrics.failure_calls,
            success_rate: inner.metrics.success_rate(),
            last_call: inner.metrics.last_call,
        }
    }

    /// Decide whether a call may proceed. `Err` carries the retry hint.
    fn admit(&self) -> Result<Admission, Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed < self.cooldown {
                    return Err(self.cooldown - elapsed);
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                drop(inner);

                tracing::info!(service = %self.service, "Circuit breaker half-open, probing downstream");
                metrics::record_breaker_state(self.service, CircuitState::HalfOpen);
                Ok(Admission::Probe)
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(PROBE_RETRY_HINT)
                } else {
                    inner.probe_in_flight = true;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_calls += 1;
        inner.metrics.last_call = Some(Utc::now());
        inner.consecutive_failures = 0;

        // Only the probe decides recovery; stragglers admitted while Closed
        // do not close an Open circuit.
        if admission == Admission::Probe {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Closed;
            drop(inner);

            tracing::info!(service = %self.service, "Circuit breaker closed after successful probe");
            metrics::record_breaker_state(self.service, CircuitState::Closed);
        }
    }

    fn on_failure(&self, admission: Admission) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_calls += 1;
        inner.metrics.last_call = Some(Utc::now());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let opened = match (admission, inner.state) {
            (Admission::Probe, _) => {
                inner.probe_in_flight = false;
                true
            }
            (Admission::Normal, CircuitState::Closed) => {
                inner.consecutive_failures >= self.failure_threshold
            }
            // A straggler failing while Open/HalfOpen leaves the cooldown alone.
            (Admission::Normal, _) => false,
        };

        if opened {
            inner.state = CircuitState::Open;
            inner.last_failure = Some(Instant::now());
            let failures = inner.consecutive_failures;
            drop(inner);

            tracing::warn!(
                service = %self.service,
                failures,
                cooldown = ?self.cooldown,
                probe = admission == Admission::Probe,
                "Circuit breaker opened"
            );
            metrics::record_breaker_state(self.service, CircuitState::Open);
        } else if inner.state == CircuitState::Closed {
            inner.last_failure = Some(Instant::now());
        }
    }
}

/// Settles a probe whose future was dropped before completing.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            tracing::warn!(service = %self.breaker.service, "Probe cancelled before completion");
            self.breaker.on_failure(Admission::Probe);
        }
    }
}

/// One breaker per known service, created up front.
pub struct CircuitBreakerRegistry {
    breakers: [Arc<CircuitBreaker>; 2],
}

impl CircuitBreakerRegistry {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        let breakers = Service::ALL.map(|service| {
            Arc::new(CircuitBreaker::new(service, config.failure_threshold, config.cooldown()))
        });
        tracing::info!(
            failure_threshold = config.failure_threshold,
            cooldown_secs = config.cooldown_secs,
            services = breakers.len(),
            "Circuit breakers initialized"
        );
        Self { breakers }
    }

    pub fn get(&self, service: Service) -> &Arc<CircuitBreaker> {
        &self.breakers[service.index()]
    }

    pub async fn call<F, Fut, T, E>(&self, service: Service, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get(service).call(op).await
    }

    pub fn reset(&self, service: Service) {
        self.get(service).reset();
    }

    /// State and counters for every breaker. Each breaker's lock is taken only
    /// long enough to copy its fields.
    pub fn status_snapshot(&self) -> Vec<BreakerStatus> {
        self.breakers.iter().map(|b| b.status()).collect()
    }
}
