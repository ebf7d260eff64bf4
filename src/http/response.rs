//! Client-facing error responses.
//!
//! Every rejection leaves the gateway as the same JSON envelope with a
//! stable machine-readable code. Downstream bodies and internal error chains
//! are logged here and never returned.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::error::{AuthError, GatewayError};

#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Whole seconds until a retry may succeed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
            retry_after: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after_secs(retry_after));
        self
    }

    pub fn into_response_with(self, status: StatusCode) -> Response {
        let retry_after = self.retry_after;
        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Round up to whole seconds, never below one.
fn retry_after_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Auth(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Transport { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Server { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::Client { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST)
            }
            GatewayError::Decode { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RequestTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            GatewayError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            GatewayError::Auth(AuthError::Missing) => "MISSING_AUTH",
            GatewayError::Auth(AuthError::InvalidScheme) => "INVALID_AUTH_FORMAT",
            GatewayError::Auth(AuthError::Expired) => "TOKEN_EXPIRED",
            GatewayError::Auth(AuthError::Revoked) => "TOKEN_REVOKED",
            GatewayError::Auth(AuthError::Malformed) => "TOKEN_MALFORMED",
            GatewayError::Forbidden => "INSUFFICIENT_PERMISSIONS",
            GatewayError::Configuration(_) => "SERVICE_MISCONFIGURED",
            GatewayError::Transport { .. } => "UPSTREAM_UNAVAILABLE",
            GatewayError::Timeout { .. } => "UPSTREAM_TIMEOUT",
            GatewayError::Server { .. } => "UPSTREAM_ERROR",
            GatewayError::Client { .. } => "UPSTREAM_REJECTED",
            GatewayError::Decode { .. } => "UPSTREAM_CONTRACT_VIOLATION",
            GatewayError::BadRequest(_) => "INVALID_REQUEST",
            GatewayError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            GatewayError::RequestTimeout { .. } => "REQUEST_TIMEOUT",
        }
    }

    fn client_message(&self) -> String {
        match self {
            GatewayError::CircuitOpen { service, .. } => {
                format!("{service} service is temporarily unavailable")
            }
            GatewayError::RateLimited { .. } => "Too many requests".to_string(),
            GatewayError::Auth(e) => e.to_string(),
            GatewayError::Forbidden => "Insufficient permissions".to_string(),
            GatewayError::Configuration(_) => "Service is not configured".to_string(),
            GatewayError::Transport { service, .. } => format!("{service} service is unreachable"),
            GatewayError::Timeout { service } => format!("{service} service did not respond in time"),
            GatewayError::Server { service, .. } => format!("{service} service failed"),
            GatewayError::Client { service, .. } => format!("{service} service rejected the request"),
            GatewayError::Decode { service, .. } => {
                format!("{service} service returned an invalid response")
            }
            GatewayError::BadRequest(msg) => msg.clone(),
            GatewayError::PayloadTooLarge { .. } => "Request body too large".to_string(),
            GatewayError::RequestTimeout { .. } => "Request did not complete in time".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Configuration(_) => tracing::error!(error = %self, "Configuration error"),
            GatewayError::Transport { .. } | GatewayError::Decode { .. } => {
                tracing::warn!(error = ?self, "Downstream call failed")
            }
            _ => {}
        }

        let mut body = ApiError::new(self.code(), self.client_message());
        match &self {
            GatewayError::CircuitOpen { retry_after, .. }
            | GatewayError::RateLimited { retry_after } => {
                body = body.with_retry_after(*retry_after);
            }
            GatewayError::PayloadTooLarge { limit } => {
                body = body.with_details(format!("maximum body size is {limit} bytes"));
            }
            _ => {}
        }

        body.into_response_with(self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Service;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_carries_retry_after() {
        let res = GatewayError::RateLimited { retry_after: Duration::from_millis(39_200) }.into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[header::RETRY_AFTER], "40");

        let json = body_json(res).await;
        assert_eq!(json["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["retry_after"], 40);
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_retry_after_never_zero() {
        let res = GatewayError::CircuitOpen {
            service: Service::Data,
            retry_after: Duration::ZERO,
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.headers()[header::RETRY_AFTER], "1");
    }

    #[tokio::test]
    async fn test_auth_reasons_are_distinct() {
        let codes: Vec<_> = [AuthError::Expired, AuthError::Revoked, AuthError::Malformed]
            .into_iter()
            .map(|e| GatewayError::Auth(e).code())
            .collect();
        assert_eq!(codes, ["TOKEN_EXPIRED", "TOKEN_REVOKED", "TOKEN_MALFORMED"]);
    }

    #[tokio::test]
    async fn test_downstream_detail_not_leaked() {
        let res = GatewayError::Server { service: Service::Rules, status: 500 }.into_response();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
        let json = body_json(res).await;
        assert_eq!(json["code"], "UPSTREAM_ERROR");
        assert!(json.get("details").is_none());
    }

    #[test]
    fn test_client_status_passes_through() {
        let err = GatewayError::Client { service: Service::Data, status: 404 };
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
