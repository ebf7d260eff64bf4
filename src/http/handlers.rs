//! Route handlers.
//!
//! Business handlers validate the caller's payload, then hand off to the
//! dispatcher. None of them talk to a downstream directly.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

use super::response::ApiError;
use super::server::AppState;
use crate::auth::{bearer_token, Identity};
use crate::dispatch::Service;
use crate::error::GatewayError;

type HandlerResult = Result<Json<Value>, GatewayError>;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

trait Validate {
    fn validate(&self) -> Result<(), String>;
}

fn parse_body<T: DeserializeOwned + Validate>(body: &Bytes) -> Result<T, GatewayError> {
    let value: T = serde_json::from_slice(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid JSON body: {e}")))?;
    value.validate().map_err(GatewayError::BadRequest)?;
    Ok(value)
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(format!("{field} must be between {min} and {max} characters"));
    }
    Ok(())
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("username", &self.username, 3, 50)?;
        if !self.username.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err("username must be alphanumeric".to_string());
        }
        check_len("password", &self.password, 8, 100)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

impl Validate for RefreshRequest {
    fn validate(&self) -> Result<(), String> {
        if self.refresh_token.is_empty() {
            return Err("refresh_token is required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl Validate for ChangePasswordRequest {
    fn validate(&self) -> Result<(), String> {
        check_len("current_password", &self.current_password, 8, 100)?;
        check_len("new_password", &self.new_password, 8, 100)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Album {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    pub artist: String,
    pub price: f64,
}

impl Validate for Album {
    fn validate(&self) -> Result<(), String> {
        check_len("title", &self.title, 1, 200)?;
        check_len("artist", &self.artist, 1, 100)?;
        if !(0.0..=999_999.0).contains(&self.price) {
            return Err("price must be between 0 and 999999".to_string());
        }
        Ok(())
    }
}

/// Free-form admin payloads are forwarded as-is but must be JSON objects.
impl Validate for serde_json::Map<String, Value> {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Path segments are interpolated into downstream URLs.
fn path_id(id: &str) -> Result<&str, GatewayError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(GatewayError::BadRequest(format!("invalid identifier: {id}")))
    }
}

fn with_query(path: &str, query: Option<String>) -> String {
    match query {
        Some(q) if !q.is_empty() => format!("{path}?{q}"),
        _ => path.to_string(),
    }
}

async fn forward<P>(
    state: &AppState,
    service: Service,
    method: Method,
    path: &str,
    payload: Option<&P>,
) -> HandlerResult
where
    P: Serialize + ?Sized,
{
    state.dispatcher.invoke(service, method, path, payload).await.map(Json)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "timestamp": Utc::now().timestamp(),
    }))
}

pub async fn breaker_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "circuit_breakers": state.breakers.status_snapshot(),
        "timestamp": Utc::now().timestamp(),
    }))
}

pub async fn reset_breaker(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(service): Path<String>,
) -> Response {
    let Ok(parsed) = service.parse::<Service>() else {
        return ApiError::new("SERVICE_NOT_FOUND", "Circuit breaker for service not found")
            .into_response_with(StatusCode::NOT_FOUND);
    };

    state.breakers.reset(parsed);
    tracing::info!(service = %parsed, user_id = %identity.user_id, "Circuit breaker reset by operator");
    Json(json!({
        "message": format!("Circuit breaker for {parsed} has been reset"),
    }))
    .into_response()
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

pub async fn login(State(state): State<AppState>, body: Bytes) -> HandlerResult {
    let request: LoginRequest = parse_body(&body)?;
    forward(&state, Service::Rules, Method::POST, "/auth/login", Some(&request)).await
}

pub async fn refresh(State(state): State<AppState>, body: Bytes) -> HandlerResult {
    let request: RefreshRequest = parse_body(&body)?;
    forward(&state, Service::Rules, Method::POST, "/auth/refresh", Some(&request)).await
}

/// Revoke locally first so the token is dead even if the rules service is down.
pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> HandlerResult {
    if !identity.is_anonymous() {
        let token = bearer_token(&headers)?;
        state.validator.revoke(token, identity.expires_at);

        let payload = json!({ "token": token });
        if let Err(e) = state
            .dispatcher
            .invoke(Service::Rules, Method::POST, "/auth/logout", Some(&payload))
            .await
        {
            tracing::warn!(user_id = %identity.user_id, error = %e, "Rules service logout failed; token revoked locally");
        }
    }

    Ok(Json(json!({ "message": "Successfully logged out" })))
}

pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> HandlerResult {
    let request: ChangePasswordRequest = parse_body(&body)?;
    let payload = json!({
        "user_id": identity.user_id,
        "current_password": request.current_password,
        "new_password": request.new_password,
    });
    forward(&state, Service::Rules, Method::PUT, "/auth/change-password", Some(&payload)).await
}

// ---------------------------------------------------------------------------
// Albums (data service)
// ---------------------------------------------------------------------------

pub async fn list_albums(State(state): State<AppState>, RawQuery(query): RawQuery) -> HandlerResult {
    let path = with_query("/albums", query);
    forward::<()>(&state, Service::Data, Method::GET, &path, None).await
}

pub async fn get_album(State(state): State<AppState>, Path(id): Path<String>) -> HandlerResult {
    let path = format!("/albums/{}", path_id(&id)?);
    forward::<()>(&state, Service::Data, Method::GET, &path, None).await
}

pub async fn create_album(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    let album: Album = parse_body(&body)?;
    let created = forward(&state, Service::Data, Method::POST, "/albums", Some(&album)).await?;
    Ok((StatusCode::CREATED, created))
}

pub async fn update_album(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let path = format!("/albums/{}", path_id(&id)?);
    let album: Album = parse_body(&body)?;
    forward(&state, Service::Data, Method::PUT, &path, Some(&album)).await
}

pub async fn delete_album(State(state): State<AppState>, Path(id): Path<String>) -> HandlerResult {
    let path = format!("/albums/{}", path_id(&id)?);
    forward::<()>(&state, Service::Data, Method::DELETE, &path, None).await
}

// ---------------------------------------------------------------------------
// Admin (rules service)
// ---------------------------------------------------------------------------

type JsonObject = serde_json::Map<String, Value>;

pub async fn list_users(State(state): State<AppState>, RawQuery(query): RawQuery) -> HandlerResult {
    let path = with_query("/admin/users", query);
    forward::<()>(&state, Service::Rules, Method::GET, &path, None).await
}

pub async fn get_user(State(state): State<AppState>, Path(id): Path<String>) -> HandlerResult {
    let path = format!("/admin/users/{}", path_id(&id)?);
    forward::<()>(&state, Service::Rules, Method::GET, &path, None).await
}

pub async fn create_user(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), GatewayError> {
    let user: JsonObject = parse_body(&body)?;
    let created = forward(&state, Service::Rules, Method::POST, "/admin/users", Some(&user)).await?;
    Ok((StatusCode::CREATED, created))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let path = format!("/admin/users/{}", path_id(&id)?);
    let user: JsonObject = parse_body(&body)?;
    forward(&state, Service::Rules, Method::PUT, &path, Some(&user)).await
}

pub async fn delete_user(State(state): State<AppState>, Path(id): Path<String>) -> HandlerResult {
    let path = format!("/admin/users/{}", path_id(&id)?);
    forward::<()>(&state, Service::Rules, Method::DELETE, &path, None).await
}

pub async fn list_roles(State(state): State<AppState>) -> HandlerResult {
    forward::<()>(&state, Service::Rules, Method::GET, "/admin/roles", None).await
}

pub async fn assign_role(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> HandlerResult {
    let path = format!("/admin/users/{}/roles", path_id(&id)?);
    let assignment: JsonObject = parse_body(&body)?;
    forward(&state, Service::Rules, Method::POST, &path, Some(&assignment)).await
}

pub async fn remove_role(
    State(state): State<AppState>,
    Path((id, role)): Path<(String, String)>,
) -> HandlerResult {
    let path = format!("/admin/users/{}/roles/{}", path_id(&id)?, path_id(&role)?);
    forward::<()>(&state, Service::Rules, Method::DELETE, &path, None).await
}

pub async fn system_stats(State(state): State<AppState>) -> HandlerResult {
    forward::<()>(&state, Service::Rules, Method::GET, "/admin/system/stats", None).await
}

pub async fn audit_logs(State(state): State<AppState>, RawQuery(query): RawQuery) -> HandlerResult {
    let path = with_query("/admin/audit-logs", query);
    forward::<()>(&state, Service::Rules, Method::GET, &path, None).await
}

pub async fn not_found() -> Response {
    ApiError::new("NOT_FOUND", "Route not found").into_response_with(StatusCode::NOT_FOUND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_validation() {
        let ok = Bytes::from_static(br#"{"username":"alice","password":"correct-horse"}"#);
        assert!(parse_body::<LoginRequest>(&ok).is_ok());

        let short = Bytes::from_static(br#"{"username":"al","password":"correct-horse"}"#);
        assert!(matches!(parse_body::<LoginRequest>(&short), Err(GatewayError::BadRequest(_))));

        let not_json = Bytes::from_static(b"username=alice");
        assert!(matches!(parse_body::<LoginRequest>(&not_json), Err(GatewayError::BadRequest(_))));
    }

    #[test]
    fn test_album_validation() {
        let bad_price = Bytes::from_static(br#"{"title":"t","artist":"a","price":-1}"#);
        assert!(parse_body::<Album>(&bad_price).is_err());

        let ok = Bytes::from_static(br#"{"title":"Blue Train","artist":"Coltrane","price":19.99}"#);
        let album: Album = parse_body(&ok).unwrap();
        assert_eq!(album.artist, "Coltrane");
    }

    #[test]
    fn test_path_ids_cannot_escape_segment() {
        assert!(path_id("42").is_ok());
        assert!(path_id("550e8400-e29b-41d4").is_ok());
        assert!(path_id("../admin").is_err());
        assert!(path_id("a/b").is_err());
        assert!(path_id("").is_err());
    }

    #[test]
    fn test_query_forwarding() {
        assert_eq!(with_query("/albums", Some("page=2".into())), "/albums?page=2");
        assert_eq!(with_query("/albums", Some(String::new())), "/albums");
        assert_eq!(with_query("/albums", None), "/albums");
    }
}
