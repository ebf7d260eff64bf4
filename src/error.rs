//! Error types for the gateway.
//!
//! Every rejection the gateway can produce is a variant of [`GatewayError`].
//! The HTTP layer turns these into client-facing envelopes with a stable code
//! (see `http::response`); nothing below this module knows about status codes.

use std::time::Duration;
use thiserror::Error;

use crate::dispatch::Service;

/// Authentication failures, kept distinct so clients can react differently:
/// expired → refresh, revoked → log in again, malformed → fix the client.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header is required")]
    Missing,

    #[error("authorization header must be in format 'Bearer <token>'")]
    InvalidScheme,

    #[error("token is malformed or has an invalid signature")]
    Malformed,

    #[error("token has expired")]
    Expired,

    #[error("token has been revoked")]
    Revoked,
}

impl AuthError {
    /// Metric/log label for this failure class.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::Missing => "missing",
            AuthError::InvalidScheme => "invalid_scheme",
            AuthError::Malformed => "malformed",
            AuthError::Expired => "expired",
            AuthError::Revoked => "revoked",
        }
    }
}

/// Error returned by a call made through a circuit breaker.
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The breaker refused the call; the operation was never invoked.
    #[error("circuit breaker is open, retry after {retry_after:?}")]
    Open { retry_after: Duration },

    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Main error type for gateway operations.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("circuit breaker is open for service {service}")]
    CircuitOpen { service: Service, retry_after: Duration },

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("caller lacks the required role")]
    Forbidden,

    /// Unknown service or missing backend configuration. A defect, not transient.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("transport error calling {service}: {source}")]
    Transport {
        service: Service,
        #[source]
        source: reqwest::Error,
    },

    #[error("call to {service} exceeded its deadline")]
    Timeout { service: Service },

    #[error("{service} returned server error {status}")]
    Server { service: Service, status: u16 },

    #[error("{service} rejected the request with status {status}")]
    Client { service: Service, status: u16 },

    #[error("failed to decode response from {service}: {source}")]
    Decode {
        service: Service,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The caller-facing deadline passed before a response was ready.
    #[error("request did not complete within {after:?}")]
    RequestTimeout { after: Duration },
}

impl GatewayError {
    /// True for failures that count against a downstream's circuit breaker.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. } | GatewayError::Timeout { .. } | GatewayError::Server { .. }
        )
    }
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
