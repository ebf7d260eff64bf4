//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): inbound requests by method, route, status
//! - `gateway_request_duration_seconds` (histogram): inbound latency
//! - `gateway_external_calls_total` (counter): downstream calls by service, endpoint, outcome
//! - `gateway_external_call_duration_seconds` (histogram): downstream latency
//! - `gateway_rate_limited_total` (counter): rejections by limiter
//! - `gateway_auth_failures_total` (counter): authentication/authorization failures by reason
//! - `gateway_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup
//! - Endpoint labels are normalised to keep cardinality bounded

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;

use crate::dispatch::Service;
use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, route: &str, status: u16, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    metrics::counter!(
        "gateway_requests_total",
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_request_duration_seconds",
        "method" => method.to_string(),
        "route" => route.to_string()
    )
    .record(elapsed);
}

/// Count and time every inbound request.
pub async fn track_requests(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let route = normalize_endpoint(request.uri().path());

    let response = next.run(request).await;
    record_request(&method, &route, response.status().as_u16(), start);
    response
}

/// Outcome class of one downstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Ok,
    ClientError,
    ServerError,
    TransportError,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Ok => "ok",
            CallOutcome::ClientError => "client_error",
            CallOutcome::ServerError => "server_error",
            CallOutcome::TransportError => "transport_error",
        }
    }
}

pub fn record_external_call(service: Service, path: &str, outcome: CallOutcome, start: Instant) {
    let endpoint = normalize_endpoint(path);
    let elapsed = start.elapsed().as_secs_f64();

    metrics::counter!(
        "gateway_external_calls_total",
        "service" => service.as_str(),
        "endpoint" => endpoint.clone(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    metrics::histogram!(
        "gateway_external_call_duration_seconds",
        "service" => service.as_str(),
        "endpoint" => endpoint
    )
    .record(elapsed);
}

pub fn record_rate_limited(limiter: &'static str) {
    metrics::counter!("gateway_rate_limited_total", "limiter" => limiter).increment(1);
}

pub fn record_auth_failure(reason: &'static str) {
    metrics::counter!("gateway_auth_failures_total", "reason" => reason).increment(1);
}

pub fn record_breaker_state(service: Service, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };
    metrics::gauge!("gateway_circuit_state", "service" => service.as_str()).set(value);
}

/// Replace identifier-like path segments with `:id`, dropping any query.
pub fn normalize_endpoint(path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path
        .split('/')
        .map(|segment| if is_identifier(segment) { ":id" } else { segment })
        .collect();
    segments.join("/")
}

fn is_identifier(segment: &str) -> bool {
    if segment.is_empty() {
        return false;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        return true;
    }
    // UUIDs and long hex ids
    segment.len() >= 16 && segment.bytes().all(|b| b.is_ascii_hexdigit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/albums/42"), "/albums/:id");
        assert_eq!(
            normalize_endpoint("/admin/users/550e8400-e29b-41d4-a716-446655440000/roles"),
            "/admin/users/:id/roles"
        );
        assert_eq!(normalize_endpoint("/admin/audit-logs?page=2"), "/admin/audit-logs");
        assert_eq!(normalize_endpoint("/auth/me"), "/auth/me");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_external_call(Service::Data, "/albums/1", CallOutcome::ServerError, Instant::now());
        record_breaker_state(Service::Rules, CircuitState::Open);
        record_rate_limited("general");
    }
}
