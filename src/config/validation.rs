//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, quotas, intervals > 0)
//! - Enforce the downstream deadline being shorter than the request timeout
//! - Check service URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use url::Url;

use crate::config::schema::{GatewayConfig, QuotaConfig, ServiceEndpointConfig};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new("circuit_breaker.failure_threshold", "must be at least 1"));
    }
    if config.circuit_breaker.cooldown_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.cooldown_secs", "must be greater than 0"));
    }

    check_quota("rate_limit.general", &config.rate_limit.general, &mut errors);
    check_quota("rate_limit.login", &config.rate_limit.login, &mut errors);
    check_quota("rate_limit.admin", &config.rate_limit.admin, &mut errors);
    if config.rate_limit.idle_multiple == 0 {
        errors.push(ValidationError::new("rate_limit.idle_multiple", "must be at least 1"));
    }

    let timeouts = &config.timeouts;
    if timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if timeouts.downstream_ms == 0 {
        errors.push(ValidationError::new("timeouts.downstream_ms", "must be greater than 0"));
    } else if timeouts.downstream_ms >= timeouts.request_secs.saturating_mul(1000) {
        errors.push(ValidationError::new(
            "timeouts.downstream_ms",
            "must be strictly shorter than timeouts.request_secs",
        ));
    }

    check_service("services.data", &config.services.data, &mut errors);
    check_service("services.rules", &config.services.rules, &mut errors);

    if config.auth.enabled && config.auth.jwt_secret.trim().is_empty() {
        errors.push(ValidationError::new("auth.jwt_secret", "required when auth is enabled"));
    }
    if config.auth.revocation_sweep_secs == 0 {
        errors.push(ValidationError::new("auth.revocation_sweep_secs", "must be greater than 0"));
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_quota(field: &str, quota: &QuotaConfig, errors: &mut Vec<ValidationError>) {
    if quota.requests == 0 {
        errors.push(ValidationError::new(format!("{field}.requests"), "must be at least 1"));
    }
    if quota.interval_secs == 0 {
        errors.push(ValidationError::new(format!("{field}.interval_secs"), "must be greater than 0"));
    }
}

fn check_service(field: &str, service: &ServiceEndpointConfig, errors: &mut Vec<ValidationError>) {
    match Url::parse(&service.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => errors.push(ValidationError::new(
            format!("{field}.base_url"),
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(format!("{field}.base_url"), e.to_string())),
    }
    if service.service_key.is_empty() {
        errors.push(ValidationError::new(format!("{field}.service_key"), "must not be empty"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = GatewayConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        config.rate_limit.login.requests = 0;
        config.services.data.base_url = "ftp://example.com".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "circuit_breaker.failure_threshold",
                "rate_limit.login.requests",
                "services.data.base_url",
            ]
        );
    }

    #[test]
    fn test_downstream_deadline_must_undercut_request_timeout() {
        let mut config = GatewayConfig::default();
        config.timeouts.request_secs = 5;
        config.timeouts.downstream_ms = 5_000;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "timeouts.downstream_ms");

        config.timeouts.downstream_ms = 4_999;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_secret_rejected_only_when_auth_enabled() {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "  ".into();
        assert!(validate_config(&config).is_err());

        config.auth.enabled = false;
        assert!(validate_config(&config).is_ok());
    }
}
