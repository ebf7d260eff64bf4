//! Axum middleware for authentication and role checks.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::token::{Identity, TokenValidator};
use crate::error::{AuthError, GatewayError};
use crate::observability::metrics;

/// Roles allowed on admin routes.
pub const ADMIN_ROLES: &[&str] = &["admin", "super_admin"];

#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<TokenValidator>,
    pub enabled: bool,
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::InvalidScheme)?;

    match value.split_once(' ') {
        Some(("Bearer", token)) if !token.is_empty() && !token.contains(' ') => Ok(token),
        _ => Err(AuthError::InvalidScheme),
    }
}

/// Reject unauthenticated requests before they reach a handler.
///
/// The resolved [`Identity`] is placed in the request extensions for
/// handlers and copied onto the response for the audit layer.
pub async fn require_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let identity = if state.enabled {
        let result = bearer_token(request.headers()).and_then(|token| state.validator.validate(token));
        match result {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(reason = e.reason(), path = %request.uri().path(), "Authentication failed");
                metrics::record_auth_failure(e.reason());
                return GatewayError::Auth(e).into_response();
            }
        }
    } else {
        Identity::anonymous()
    };

    request.extensions_mut().insert(identity.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(identity);
    response
}

/// Allow the request only if the caller holds one of `roles`.
///
/// Must run inside [`require_auth`].
pub async fn require_roles(
    State(roles): State<&'static [&'static str]>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let allowed = request
        .extensions()
        .get::<Identity>()
        .is_some_and(|identity| identity.has_any_role(roles));

    if !allowed {
        tracing::warn!(path = %request.uri().path(), required = ?roles, "Insufficient permissions");
        metrics::record_auth_failure("forbidden");
        return GatewayError::Forbidden.into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Claims, RevocationStore};
    use axum::{http::StatusCode, middleware, routing::get, Extension, Router};
    use chrono::{Duration as ChronoDuration, Utc};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use tower::ServiceExt;

    fn token(roles: &[&str]) -> String {
        let claims = Claims {
            user_id: "42".into(),
            username: "bob".into(),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            exp: (Utc::now() + ChronoDuration::hours(1)).timestamp(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s")).unwrap()
    }

    fn app(enabled: bool) -> Router {
        let state = AuthState {
            validator: Arc::new(TokenValidator::new("s", Arc::new(RevocationStore::new()))),
            enabled,
        };
        let admin = Router::new()
            .route("/admin", get(|| async { "admin" }))
            .layer(middleware::from_fn_with_state(ADMIN_ROLES, require_roles));

        Router::new()
            .route(
                "/me",
                get(|Extension(identity): Extension<Identity>| async move { identity.username }),
            )
            .merge(admin)
            .layer(middleware::from_fn_with_state(state, require_auth))
    }

    fn get_with(uri: &str, auth: Option<String>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), Err(AuthError::Missing));

        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Err(AuthError::InvalidScheme));

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Ok("abc"));
    }

    #[tokio::test]
    async fn test_identity_reaches_handler_and_response() {
        let res = app(true)
            .oneshot(get_with("/me", Some(format!("Bearer {}", token(&["user"])))))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.extensions().get::<Identity>().map(|i| i.user_id.as_str()), Some("42"));
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let res = app(true).oneshot(get_with("/me", None)).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_role_gate() {
        let user = app(true)
            .oneshot(get_with("/admin", Some(format!("Bearer {}", token(&["user"])))))
            .await
            .unwrap();
        assert_eq!(user.status(), StatusCode::FORBIDDEN);

        let admin = app(true)
            .oneshot(get_with("/admin", Some(format!("Bearer {}", token(&["super_admin"])))))
            .await
            .unwrap();
        assert_eq!(admin.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_auth_runs_anonymous() {
        let me = app(false).oneshot(get_with("/me", None)).await.unwrap();
        assert_eq!(me.status(), StatusCode::OK);

        let admin = app(false).oneshot(get_with("/admin", None)).await.unwrap();
        assert_eq!(admin.status(), StatusCode::FORBIDDEN);
    }
}
