use axum::{
    Json,
    extract::{RawQuery, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_sessions::Session;

use super::{ApiError, AppState, FlowResponse};
use crate::constants::{CONFIRM_EMAIL_ROUTE, HOME_ROUTE, SPLASH_ROUTE, error_codes, messages};
use crate::db::{Store, User};
use crate::models::forms::{LoginInput, RegisterInput};
use crate::services::{LoginOutcome, RegisterOutcome};

pub const SESSION_USER_KEY: &str = "user_id";
pub const SESSION_EMAIL_VALIDATED_KEY: &str = "email_validated";
pub const SESSION_CSRF_KEY: &str = "csrf_token";

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RegisterPayload {
    pub username: String,
    pub email: String,
    pub confirm_email: String,
    pub password: String,
    pub confirm_password: String,
    pub csrf_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
    pub csrf_token: Option<String>,
}

// ============================================================================
// Session helpers
// ============================================================================

/// Associate `user` with the response cookie. The validated flag mirrors
/// the database state at bind time for the UI's benefit; the auth gate
/// always re-checks the database.
pub async fn bind_session(
    session: &Session,
    user: &User,
    email_validated: bool,
) -> Result<(), ApiError> {
    session
        .insert(SESSION_USER_KEY, user.id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;
    session
        .insert(SESSION_EMAIL_VALIDATED_KEY, email_validated)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;
    Ok(())
}

/// Identity bound to the incoming request, if any.
pub async fn current_user_id(session: &Session) -> Result<Option<i32>, ApiError> {
    session
        .get::<i32>(SESSION_USER_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))
}

/// Return the session's CSRF token, minting one on first use.
pub async fn issue_csrf(session: &Session) -> Result<String, ApiError> {
    if let Some(token) = session
        .get::<String>(SESSION_CSRF_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?
    {
        return Ok(token);
    }

    let token = generate_csrf_token();
    session
        .insert(SESSION_CSRF_KEY, &token)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;
    Ok(token)
}

/// State-changing POSTs must echo the session's CSRF token.
pub async fn verify_csrf(session: &Session, presented: Option<&str>) -> Result<(), ApiError> {
    let stored = session
        .get::<String>(SESSION_CSRF_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    match (stored, presented) {
        (Some(stored), Some(presented)) if stored == presented => Ok(()),
        _ => Err(ApiError::MissingCsrf),
    }
}

/// 302 Found redirect; the identity flows use `302`, not axum's
/// default `303`.
pub fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(axum::http::header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// Generate a random CSRF token (64 character hex string)
#[must_use]
fn generate_csrf_token() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Gate for routes that need an authenticated, email-validated user.
/// Anonymous requests land on the splash page; bound-but-unvalidated
/// users are sent to the confirm-email page.
pub async fn email_validation_required(
    State(state): State<Arc<AppState>>,
    session: Session,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(user_id) = current_user_id(&session).await? else {
        return Ok(found(SPLASH_ROUTE));
    };

    if !state.store.is_email_validated(user_id).await? {
        return Ok(found(CONFIRM_EMAIL_ROUTE));
    }

    Ok(next.run(request).await)
}

// ============================================================================
// `?next=` resolution
// ============================================================================

/// Parse a login query string into a whitelisted `next` candidate:
/// a single `next` parameter holding a relative URL whose path is the
/// home route and whose query is exactly one positive-integer `UTubID`.
fn parse_next_candidate(raw_query: &str) -> Option<(String, i32)> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(raw_query.as_bytes())
        .into_owned()
        .collect();

    if pairs.len() != 1 {
        return None;
    }

    let (key, next) = &pairs[0];
    if key != "next" {
        return None;
    }

    let (path, query) = next.split_once('?')?;
    if path != HOME_ROUTE {
        return None;
    }

    let inner: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    if inner.len() != 1 {
        return None;
    }

    let (param, value) = &inner[0];
    if param != "UTubID" {
        return None;
    }

    let utub_id: i32 = value.parse().ok()?;
    if utub_id <= 0 {
        return None;
    }

    Some((next.clone(), utub_id))
}

/// Resolve the post-login redirect, dropping any `next` candidate the
/// whitelist or the membership check rejects.
pub async fn resolve_next_url(
    raw_query: Option<&str>,
    store: &Store,
    user_id: i32,
) -> Result<String, ApiError> {
    let Some((next, utub_id)) = raw_query.and_then(parse_next_candidate) else {
        return Ok(HOME_ROUTE.to_string());
    };

    if store.is_utub_member(utub_id, user_id).await? {
        Ok(next)
    } else {
        Ok(HOME_ROUTE.to_string())
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /
/// Splash, or straight to home for an authenticated validated user.
pub async fn splash(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    if let Some(user_id) = current_user_id(&session).await?
        && state.store.is_email_validated(user_id).await?
    {
        return Ok(found(HOME_ROUTE));
    }

    Ok(Json(FlowResponse::success("Welcome to URLS4IRL!")).into_response())
}

/// GET /home
/// Behind `email_validation_required`.
pub async fn home(
    State(state): State<Arc<AppState>>,
    session: Session,
) -> Result<Response, ApiError> {
    let user_id = current_user_id(&session)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    Ok(Json(FlowResponse::success_with_data(json!({
        "user_id": user.id,
        "username": user.username,
    })))
    .into_response())
}

/// GET /register
pub async fn register_form(session: Session) -> Result<Response, ApiError> {
    let csrf_token = issue_csrf(&session).await?;
    Ok(Json(FlowResponse::success_with_data(json!({
        "csrf_token": csrf_token,
    })))
    .into_response())
}

/// POST /register
pub async fn register(
    State(state): State<Arc<AppState>>,
    session: Session,
    axum::Form(payload): axum::Form<RegisterPayload>,
) -> Result<Response, ApiError> {
    verify_csrf(&session, payload.csrf_token.as_deref()).await?;

    let input = RegisterInput {
        username: payload.username,
        email: payload.email,
        confirm_email: payload.confirm_email,
        password: payload.password,
        confirm_password: payload.confirm_password,
    };

    match state.identity.register(input, Utc::now()).await? {
        RegisterOutcome::Created { user } => {
            bind_session(&session, &user, false).await?;
            Ok((
                StatusCode::CREATED,
                Json(FlowResponse::success(messages::VALIDATE_YOUR_EMAIL)),
            )
                .into_response())
        }
        RegisterOutcome::UnvalidatedAccountExists { user } => {
            bind_session(&session, &user, false).await?;
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(FlowResponse::failure(
                    messages::ACCOUNT_EMAIL_NOT_VALIDATED,
                    Some(error_codes::ACCOUNT_EMAIL_NOT_VALIDATED),
                )),
            )
                .into_response())
        }
        RegisterOutcome::Invalid { errors } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure_with_errors(
                messages::UNABLE_TO_REGISTER,
                error_codes::FORM_VALIDATION,
                errors,
            )),
        )
            .into_response()),
    }
}

/// GET /login
pub async fn login_form(session: Session) -> Result<Response, ApiError> {
    let csrf_token = issue_csrf(&session).await?;
    Ok(Json(FlowResponse::success_with_data(json!({
        "csrf_token": csrf_token,
    })))
    .into_response())
}

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
    session: Session,
    axum::Form(payload): axum::Form<LoginPayload>,
) -> Result<Response, ApiError> {
    verify_csrf(&session, payload.csrf_token.as_deref()).await?;

    let input = LoginInput {
        username: payload.username,
        password: payload.password,
    };

    match state.identity.login(input, Utc::now()).await? {
        LoginOutcome::Invalid { errors } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure_with_errors(
                messages::UNABLE_TO_LOGIN,
                error_codes::FORM_VALIDATION,
                errors,
            )),
        )
            .into_response()),
        LoginOutcome::BadCredentials { errors } => Ok((
            StatusCode::UNAUTHORIZED,
            Json(FlowResponse::failure_with_errors(
                messages::UNABLE_TO_LOGIN,
                error_codes::FORM_VALIDATION,
                errors,
            )),
        )
            .into_response()),
        LoginOutcome::EmailNotValidated { user } => {
            // Bound on purpose: the resend-validation flow needs the
            // session even though this response is a 401.
            bind_session(&session, &user, false).await?;
            Ok((
                StatusCode::UNAUTHORIZED,
                Json(FlowResponse::failure(
                    messages::ACCOUNT_EMAIL_NOT_VALIDATED,
                    Some(error_codes::ACCOUNT_EMAIL_NOT_VALIDATED),
                )),
            )
                .into_response())
        }
        LoginOutcome::Success { user } => {
            bind_session(&session, &user, true).await?;
            let redirect_url =
                resolve_next_url(raw_query.as_deref(), &state.store, user.id).await?;
            Ok(Json(FlowResponse::success_with_data(json!({
                "redirect_url": redirect_url,
            })))
            .into_response())
        }
    }
}

/// GET /logout
/// Clear the session and return to the splash page.
pub async fn logout(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    found(SPLASH_ROUTE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_candidate_accepts_whitelisted_shape() {
        let (next, id) = parse_next_candidate("next=/home?UTubID=7").unwrap();
        assert_eq!(next, "/home?UTubID=7");
        assert_eq!(id, 7);
    }

    #[test]
    fn test_next_candidate_rejects_extra_outer_params() {
        assert!(parse_next_candidate("next=/home?UTubID=7&other=1").is_none());
        assert!(parse_next_candidate("other=/home?UTubID=7").is_none());
    }

    #[test]
    fn test_next_candidate_rejects_wrong_path() {
        assert!(parse_next_candidate("next=/elsewhere?UTubID=7").is_none());
        assert!(parse_next_candidate("next=https://evil.example/home?UTubID=7").is_none());
        assert!(parse_next_candidate("next=//evil.example/home?UTubID=7").is_none());
    }

    #[test]
    fn test_next_candidate_rejects_bad_inner_query() {
        assert!(parse_next_candidate("next=/home").is_none());
        assert!(parse_next_candidate("next=/home?Other=7").is_none());
        assert!(parse_next_candidate("next=/home?UTubID=7%26x=1").is_none());
        assert!(parse_next_candidate("next=/home?UTubID=abc").is_none());
        assert!(parse_next_candidate("next=/home?UTubID=0").is_none());
        assert!(parse_next_candidate("next=/home?UTubID=-3").is_none());
    }

    #[test]
    fn test_csrf_token_shape() {
        let token = generate_csrf_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_csrf_token());
    }
}
