//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream service:
//!     → circuit_breaker.rs (fail fast if the service is presumed down)
//!     → timeouts.rs (bounded deadline, shorter than the caller's timeout)
//!     → outcome recorded back on the breaker
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - A timeout counts as a transport failure and trips the breaker
//! - No retries: rejected calls fail immediately with a retry hint

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use timeouts::{request_deadline_middleware, DownstreamTimeouts, RequestDeadline};
