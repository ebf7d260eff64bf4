//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load, apply environment overrides, and validate.
///
/// With no path the defaults are used as the base.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay well-known environment variables onto `config`.
///
/// Values that fail to parse are ignored with a warning and the file/default
/// value is kept.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let (Some(host), Some(port)) = (get("HOST"), get("PORT")) {
        config.listener.bind_address = format!("{host}:{port}");
    } else if let Some(port) = get("PORT") {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(h, _)| h.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }

    if let Some(v) = get("JWT_SECRET") {
        config.auth.jwt_secret = v;
    }
    if let Some(v) = get("DATA_SERVICE_URL") {
        config.services.data.base_url = v;
    }
    if let Some(v) = get("DATA_SERVICE_KEY") {
        config.services.data.service_key = v;
    }
    if let Some(v) = get("RULES_SERVICE_URL") {
        config.services.rules.base_url = v;
    }
    if let Some(v) = get("RULES_SERVICE_KEY") {
        config.services.rules.service_key = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.observability.log_level = v.to_lowercase();
    }

    let cb = &mut config.circuit_breaker;
    parse_into(&get, "CB_FAILURE_THRESHOLD", &mut cb.failure_threshold);
    parse_into(&get, "CB_TIMEOUT_SECONDS", &mut cb.cooldown_secs);

    let rl = &mut config.rate_limit;
    parse_into(&get, "RATE_LIMIT_ENABLED", &mut rl.enabled);
    parse_into(&get, "RATE_LIMIT_REQUESTS", &mut rl.general.requests);
    parse_into(&get, "RATE_LIMIT_INTERVAL_SECONDS", &mut rl.general.interval_secs);
    parse_into(&get, "LOGIN_RATE_LIMIT_REQUESTS", &mut rl.login.requests);
    parse_into(&get, "LOGIN_RATE_LIMIT_INTERVAL_SECONDS", &mut rl.login.interval_secs);
    parse_into(&get, "ADMIN_RATE_LIMIT_REQUESTS", &mut rl.admin.requests);
    parse_into(&get, "ADMIN_RATE_LIMIT_INTERVAL_SECONDS", &mut rl.admin.interval_secs);

    parse_into(&get, "MAX_REQUEST_BODY_SIZE", &mut config.security.max_body_size);
    parse_into(&get, "ENABLE_SECURITY_HEADERS", &mut config.security.enable_headers);
    parse_into(&get, "ENABLE_AUDIT_LOGGING", &mut config.security.audit_enabled);
    parse_into(&get, "REQUEST_TIMEOUT_SECONDS", &mut config.timeouts.request_secs);
}

fn parse_into<T, G>(get: &G, key: &str, target: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_apply() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("PORT", "9000"),
                ("JWT_SECRET", "s3cret"),
                ("CB_FAILURE_THRESHOLD", "7"),
                ("LOGIN_RATE_LIMIT_REQUESTS", "3"),
                ("RATE_LIMIT_ENABLED", "false"),
                ("RULES_SERVICE_URL", "http://rules:80"),
            ]),
        );

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.circuit_breaker.failure_threshold, 7);
        assert_eq!(config.rate_limit.login.requests, 3);
        assert!(!config.rate_limit.enabled);
        assert_eq!(config.services.rules.base_url, "http://rules:80");
    }

    #[test]
    fn test_unparseable_override_keeps_existing_value() {
        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config, env(&[("CB_TIMEOUT_SECONDS", "soon")]));
        assert_eq!(config.circuit_breaker.cooldown_secs, 60);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let path = std::env::temp_dir().join(format!("gateway-config-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[circuit_breaker]\nfailure_threshold = 0\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("circuit_breaker.failure_threshold"));

        fs::remove_file(&path).unwrap_or_default();
    }
}
