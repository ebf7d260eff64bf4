//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Secret shipped as the default. Accepted, but loudly warned about.
pub const INSECURE_DEFAULT_SECRET: &str = "CHANGE_ME_IN_PRODUCTION";

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Downstream service endpoints.
    pub services: ServicesConfig,

    /// Circuit breaker thresholds, shared by every downstream.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Token validation settings.
    pub auth: AuthConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            tls: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// One downstream service: where it lives and the key the gateway presents.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceEndpointConfig {
    /// Base URL, e.g. "http://localhost:8081".
    pub base_url: String,

    /// Opaque credential sent in the `X-Service-Key` header.
    pub service_key: String,
}

/// The two downstreams the gateway fronts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Business data service.
    pub data: ServiceEndpointConfig,

    /// Rules / audit / identity service.
    pub rules: ServiceEndpointConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            data: ServiceEndpointConfig {
                base_url: "http://localhost:8081".to_string(),
                service_key: "data-service-key".to_string(),
            },
            rules: ServiceEndpointConfig {
                base_url: "http://localhost:8082".to_string(),
                service_key: "rules-service-key".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before admitting a probe.
    pub cooldown_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

/// Quota for one limiter role.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Permits granted per interval.
    pub requests: u32,

    /// Interval length in seconds.
    pub interval_secs: u64,
}

impl QuotaConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Per-IP limit applied to every route.
    pub general: QuotaConfig,

    /// Stricter per-IP limit for credential submission.
    pub login: QuotaConfig,

    /// Per-user limit for admin routes.
    pub admin: QuotaConfig,

    /// Buckets idle for this many intervals are swept.
    pub idle_multiple: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            general: QuotaConfig { requests: 100, interval_secs: 60 },
            login: QuotaConfig { requests: 5, interval_secs: 300 },
            admin: QuotaConfig { requests: 50, interval_secs: 60 },
            idle_multiple: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable bearer token validation on protected routes.
    pub enabled: bool,

    /// HMAC secret used to verify tokens.
    pub jwt_secret: String,

    /// How often expired revocations are swept, in seconds.
    pub revocation_sweep_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: INSECURE_DEFAULT_SECRET.to_string(),
            revocation_sweep_secs: 3600,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Caller-facing request timeout in seconds.
    pub request_secs: u64,

    /// Deadline for a single downstream call in milliseconds.
    /// Must be strictly shorter than `request_secs`.
    pub downstream_ms: u64,

    /// Connection establishment timeout for downstream calls in milliseconds.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            downstream_ms: 10_000,
            connect_ms: 2_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Enable security headers.
    pub enable_headers: bool,
    /// Maximum body size in bytes.
    pub max_body_size: usize,
    /// Emit one audit record per request.
    pub audit_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_headers: true,
            max_body_size: 5 * 1024 * 1024, // 5MB
            audit_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [circuit_breaker]
            failure_threshold = 3

            [rate_limit.login]
            requests = 2
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
        assert_eq!(config.rate_limit.login, QuotaConfig { requests: 2, interval_secs: 30 });
        assert_eq!(config.rate_limit.general.requests, 100);
        assert_eq!(config.services.rules.base_url, "http://localhost:8082");
    }
}
