//! Request audit trail.
//!
//! Every request that enters the pipeline produces exactly one
//! [`AuditRecord`], including requests rejected by the rate limiter or auth
//! layers, since this middleware sits outside all of them.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::Identity;
use crate::error::GatewayError;
use crate::http::request::REQUEST_ID_HEADER;
use crate::resilience::RequestDeadline;
use crate::security::client_ip;

/// Bodies at or above this size are never captured.
pub const MAX_CAPTURED_BODY: usize = 1024;

/// Paths whose bodies carry credentials and are never captured.
const SENSITIVE_PATHS: &[&str] = &[
    "/auth/login",
    "/auth/change-password",
    "/api/v1/auth/change-password",
    "/admin/users",
];

/// JSON keys redacted from captured bodies.
const REDACTED_KEYS: &[&str] = &["password", "token", "secret"];

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub user_id: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Emits records as structured events on the `audit` tracing target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, r: AuditRecord) {
        macro_rules! emit {
            ($level:ident, $msg:literal) => {
                tracing::$level!(
                    target: "audit",
                    request_id = %r.request_id,
                    timestamp = %r.timestamp.to_rfc3339(),
                    method = %r.method,
                    path = %r.path,
                    query = r.query.as_deref().unwrap_or(""),
                    ip = %r.ip,
                    user_agent = %r.user_agent,
                    user_id = %r.user_id,
                    status = r.status,
                    duration_ms = r.duration_ms,
                    request_size = r.request_size,
                    request_body = r.request_body.as_deref(),
                    $msg
                )
            };
        }

        if r.status >= 500 {
            emit!(error, "Server error");
        } else if r.status >= 400 {
            emit!(warn, "Client error");
        } else {
            emit!(info, "Request completed");
        }
    }
}

/// Keeps records in memory for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        self.records.lock().push(record);
    }
}

#[derive(Clone)]
pub struct AuditState {
    pub sink: Arc<dyn AuditSink>,
    pub max_body_size: usize,
    /// Caller-facing timeout; also bounds how long a body may take to arrive.
    pub request_timeout: Duration,
}

/// Record method, path, caller, status, duration and a sanitized body.
pub async fn audit_middleware(
    State(state): State<AuditState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let timestamp = Utc::now();
    let deadline = RequestDeadline::after(state.request_timeout);
    request.extensions_mut().insert(deadline);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let ip = client_ip(&request);
    let request_id = header_str(request.headers(), REQUEST_ID_HEADER);
    let user_agent = header_str(request.headers(), header::USER_AGENT.as_str());

    let (response, request_size, request_body) = if method == Method::GET {
        (next.run(request).await, 0, None)
    } else {
        let (parts, body) = request.into_parts();
        match tokio::time::timeout_at(deadline.at(), to_bytes(body, state.max_body_size)).await {
            Ok(Ok(bytes)) => {
                let captured = sanitize_body(&path, &bytes);
                let size = bytes.len();
                let request = Request::from_parts(parts, Body::from(bytes));
                (next.run(request).await, size, captured)
            }
            Ok(Err(_)) => {
                let limit = state.max_body_size;
                (GatewayError::PayloadTooLarge { limit }.into_response(), 0, None)
            }
            Err(_) => {
                tracing::warn!(method = %method, path = %path, "Request body did not arrive before the deadline");
                let after = state.request_timeout;
                (GatewayError::RequestTimeout { after }.into_response(), 0, None)
            }
        }
    };

    let user_id = response
        .extensions()
        .get::<Identity>()
        .filter(|identity| !identity.is_anonymous())
        .map(|identity| identity.user_id.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    state.sink.record(AuditRecord {
        request_id,
        timestamp,
        method: method.to_string(),
        path,
        query,
        ip,
        user_agent,
        user_id,
        status: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        request_size,
        request_body,
    });

    response
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Body text safe to store, or `None` when it must not be captured.
pub fn sanitize_body(path: &str, body: &[u8]) -> Option<String> {
    if body.is_empty() || body.len() >= MAX_CAPTURED_BODY || SENSITIVE_PATHS.contains(&path) {
        return None;
    }

    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(mut value) => {
            redact(&mut value);
            Some(value.to_string())
        }
        Err(_) => std::str::from_utf8(body).ok().map(str::to_string),
    }
}

fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                let lower = key.to_ascii_lowercase();
                if REDACTED_KEYS.iter().any(|k| lower.contains(k)) {
                    *field = serde_json::Value::String("[REDACTED]".to_string());
                } else {
                    redact(field);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
