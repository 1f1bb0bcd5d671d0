use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::{found, issue_csrf, verify_csrf};
use super::{ApiError, AppState, FlowResponse};
use crate::constants::{SPLASH_ROUTE, error_codes, messages};
use crate::models::forms::ResetPasswordInput;
use crate::services::{ForgotPasswordOutcome, ResetPasswordOutcome, ResetTokenCheck};

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ForgotPasswordPayload {
    pub email: String,
    pub csrf_token: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ResetPasswordPayload {
    pub new_password: String,
    pub confirm_new_password: String,
    pub csrf_token: Option<String>,
}

/// GET /forgot-password
pub async fn forgot_password_form(session: Session) -> Result<Response, ApiError> {
    let csrf_token = issue_csrf(&session).await?;
    Ok(Json(FlowResponse::success_with_data(json!({
        "csrf_token": csrf_token,
    })))
    .into_response())
}

/// POST /forgot-password
/// Every branch that could reveal whether the email exists returns the
/// same neutral 200.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    session: Session,
    axum::Form(payload): axum::Form<ForgotPasswordPayload>,
) -> Result<Response, ApiError> {
    verify_csrf(&session, payload.csrf_token.as_deref()).await?;

    match state
        .identity
        .forgot_password(&payload.email, Utc::now())
        .await?
    {
        ForgotPasswordOutcome::Invalid { errors } => Ok((
            StatusCode::UNAUTHORIZED,
            Json(FlowResponse::failure_with_errors(
                messages::EMAIL_NOT_VALID,
                error_codes::ROUTE_ERROR,
                errors,
            )),
        )
            .into_response()),
        ForgotPasswordOutcome::ProviderDown { details } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure(
                format!("{} | {details}", messages::MAILJET_FAILURE),
                Some(error_codes::MAILJET_SERVER_FAILURE),
            )),
        )
            .into_response()),
        ForgotPasswordOutcome::Neutral => {
            Ok(Json(FlowResponse::success(messages::RESET_EMAIL_NEUTRAL)).into_response())
        }
    }
}

/// GET /reset-password/{token}
pub async fn reset_password_form(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    session: Session,
) -> Result<Response, ApiError> {
    match state.identity.check_reset_token(&token, Utc::now()).await? {
        ResetTokenCheck::Valid { .. } => {
            let csrf_token = issue_csrf(&session).await?;
            Ok(Json(FlowResponse::success_with_data(json!({
                "csrf_token": csrf_token,
            })))
            .into_response())
        }
        ResetTokenCheck::ExpiredCleaned => Ok(found(SPLASH_ROUTE)),
        ResetTokenCheck::NotFound => Err(ApiError::NotFound),
    }
}

/// POST /reset-password/{token}
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    session: Session,
    axum::Form(payload): axum::Form<ResetPasswordPayload>,
) -> Result<Response, ApiError> {
    verify_csrf(&session, payload.csrf_token.as_deref()).await?;

    let input = ResetPasswordInput {
        new_password: payload.new_password,
        confirm_new_password: payload.confirm_new_password,
    };

    match state
        .identity
        .reset_password(&token, input, Utc::now())
        .await?
    {
        // No session bind: the user logs in with the new password.
        ResetPasswordOutcome::Done => {
            Ok(Json(FlowResponse::success(messages::PASSWORD_RESET)).into_response())
        }
        ResetPasswordOutcome::Invalid { errors } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure_with_errors(
                messages::COULD_NOT_RESET_PASSWORD,
                error_codes::ROUTE_ERROR,
                errors,
            )),
        )
            .into_response()),
        ResetPasswordOutcome::ExpiredCleaned => Ok(found(SPLASH_ROUTE)),
        ResetPasswordOutcome::NotFound => Err(ApiError::NotFound),
    }
}
