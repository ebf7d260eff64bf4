//! Timeout enforcement for downstream calls and inbound requests.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities around the whole call, body included
//! - Timeout errors are distinct from other transport errors
//! - Timed-out downstream calls return 504 Gateway Timeout
//! - The caller-facing deadline is absolute and set once per request; every
//!   layer that waits on the client or the handler honours the same instant
//! - An expired request deadline becomes a 408 envelope inside the pipeline,
//!   so audit and metrics still see the request

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::TimeoutConfig;
use crate::dispatch::Service;
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownstreamTimeouts {
    /// Deadline for a whole downstream call.
    pub call: Duration,
    /// Deadline for establishing the TCP connection.
    pub connect: Duration,
}

impl DownstreamTimeouts {
    /// The call deadline is clamped below the caller-facing request timeout.
    pub fn from_config(config: &TimeoutConfig) -> Self {
        let request = Duration::from_secs(config.request_secs);
        let mut call = Duration::from_millis(config.downstream_ms);
        if call >= request {
            call = request.saturating_sub(Duration::from_millis(100)).max(Duration::from_millis(1));
        }
        Self {
            call,
            connect: Duration::from_millis(config.connect_ms).min(call),
        }
    }

    /// Run `fut` under the call deadline.
    pub async fn with_deadline<F, T>(&self, service: Service, fut: F) -> Result<T, GatewayError>
    where
        F: Future<Output = Result<T, GatewayError>>,
    {
        match tokio::time::timeout(self.call, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(service = %service, deadline = ?self.call, "Downstream call timed out");
                Err(GatewayError::Timeout { service })
            }
        }
    }
}

/// Absolute caller-facing deadline, carried in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDeadline(Instant);

impl RequestDeadline {
    pub fn after(timeout: Duration) -> Self {
        Self(Instant::now() + timeout)
    }

    pub fn at(&self) -> Instant {
        self.0
    }
}

/// Bound the rest of the pipeline by the request deadline.
///
/// Uses a [`RequestDeadline`] already attached by an outer layer, otherwise
/// starts one now from `timeout`.
pub async fn request_deadline_middleware(
    State(timeout): State<Duration>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let deadline = request
        .extensions()
        .get::<RequestDeadline>()
        .copied()
        .unwrap_or_else(|| RequestDeadline::after(timeout));
    request.extensions_mut().insert(deadline);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match tokio::time::timeout_at(deadline.at(), next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(method = %method, path = %path, timeout = ?timeout, "Request deadline exceeded");
            GatewayError::RequestTimeout { after: timeout }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_deadline_shorter_than_request_timeout() {
        let config = TimeoutConfig { request_secs: 5, downstream_ms: 9_000, connect_ms: 2_000 };
        let t = DownstreamTimeouts::from_config(&config);
        assert!(t.call < Duration::from_secs(5));
        assert!(t.connect <= t.call);

        let t = DownstreamTimeouts::from_config(&TimeoutConfig::default());
        assert_eq!(t.call, Duration::from_secs(10));
        assert_eq!(t.connect, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_is_timeout_error() {
        let t = DownstreamTimeouts { call: Duration::from_millis(50), connect: Duration::from_millis(10) };
        let result: Result<(), _> = t
            .with_deadline(Service::Data, async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout { service: Service::Data })));
    }

    fn slow_app(timeout: Duration) -> axum::Router {
        axum::Router::new()
            .route(
                "/slow",
                axum::routing::get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .route("/fast", axum::routing::get(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(timeout, request_deadline_middleware))
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_gets_timeout_envelope() {
        use tower::ServiceExt;

        let res = slow_app(Duration::from_secs(1))
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), axum::http::StatusCode::REQUEST_TIMEOUT);

        let bytes = axum::body::to_bytes(res.into_body(), 4096).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["code"], "REQUEST_TIMEOUT");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inherited_deadline_is_honoured() {
        use tower::ServiceExt;

        // An outer layer already spent most of the budget.
        let deadline = RequestDeadline::after(Duration::from_millis(10));
        let mut request = Request::builder().uri("/slow").body(Body::empty()).unwrap();
        request.extensions_mut().insert(deadline);

        let started = Instant::now();
        let res = slow_app(Duration::from_secs(60)).oneshot(request).await.unwrap();
        assert_eq!(res.status(), axum::http::StatusCode::REQUEST_TIMEOUT);
        assert!(started.elapsed() < Duration::from_secs(1));

        let res = slow_app(Duration::from_secs(1))
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), axum::http::StatusCode::OK);
    }
}
