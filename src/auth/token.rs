//! JWT validation and caller identity.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::revocation::RevocationStore;
use crate::error::AuthError;

/// Claims the rules service puts in the tokens it issues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
}

/// The authenticated caller for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// Identity used when authentication is switched off. Holds no roles.
    pub fn anonymous() -> Self {
        Self {
            user_id: String::new(),
            username: "anonymous".to_string(),
            email: None,
            roles: Vec::new(),
            expires_at: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_empty()
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.roles.iter().any(|r| roles.contains(&r.as_str()))
    }
}

/// Verifies HMAC-signed tokens (HS256/384/512) against one shared secret and
/// the revocation store.
pub struct TokenValidator {
    key: DecodingKey,
    validation: Validation,
    revocations: Arc<RevocationStore>,
}

impl TokenValidator {
    pub fn new(secret: &str, revocations: Arc<RevocationStore>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        // Expiry is checked by hand so that "at or before now" is exact and
        // maps to its own error.
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            revocations,
        }
    }

    pub fn revocations(&self) -> &Arc<RevocationStore> {
        &self.revocations
    }

    pub fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.validate_at(token, Utc::now())
    }

    /// Validate as of `now`. Check order: revocation, signature, expiry.
    pub fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        if self.revocations.contains(token) {
            return Err(AuthError::Revoked);
        }

        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Token rejected");
                AuthError::Malformed
            })?
            .claims;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(AuthError::Malformed)?;
        if expires_at <= now {
            return Err(AuthError::Expired);
        }

        Ok(Identity {
            user_id: claims.user_id,
            username: claims.username,
            email: claims.email,
            roles: claims.roles,
            expires_at,
        })
    }

    /// Revoke `token` until `expires_at`.
    pub fn revoke(&self, token: &str, expires_at: DateTime<Utc>) {
        self.revocations.insert(token, expires_at);
        tracing::info!(expires_at = %expires_at, revoked = self.revocations.len(), "Token revoked");
    }
}
