use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_sessions::Session;

use super::auth::{bind_session, current_user_id, found, issue_csrf, verify_csrf};
use super::{ApiError, AppState, FlowResponse};
use crate::constants::{HOME_ROUTE, SPLASH_ROUTE, error_codes, messages};
use crate::services::{ExpiredValidationOutcome, RedeemValidationOutcome, SendValidationOutcome};

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SendValidationPayload {
    pub csrf_token: Option<String>,
}

#[derive(Deserialize)]
pub struct ExpiredQuery {
    pub token: String,
}

/// GET /confirm-email
/// The "please validate your email" view for a bound session.
pub async fn confirm_email(session: Session) -> Result<Response, ApiError> {
    if current_user_id(&session).await?.is_none() {
        return Ok(found(SPLASH_ROUTE));
    }

    let csrf_token = issue_csrf(&session).await?;
    Ok(Json(
        FlowResponse::success(messages::VALIDATE_YOUR_EMAIL).with_data(json!({
            "csrf_token": csrf_token,
        })),
    )
    .into_response())
}

/// POST /send-validation-email
pub async fn send_validation_email(
    State(state): State<Arc<AppState>>,
    session: Session,
    axum::Form(payload): axum::Form<SendValidationPayload>,
) -> Result<Response, ApiError> {
    let Some(user_id) = current_user_id(&session).await? else {
        return Ok(found(SPLASH_ROUTE));
    };

    verify_csrf(&session, payload.csrf_token.as_deref()).await?;

    match state
        .identity
        .send_validation_email(user_id, Utc::now())
        .await?
    {
        SendValidationOutcome::Sent => {
            Ok(Json(FlowResponse::success(messages::EMAIL_SENT)).into_response())
        }
        SendValidationOutcome::AlreadyValidated => Ok(found(HOME_ROUTE)),
        SendValidationOutcome::MissingValidation => Err(ApiError::NotFound),
        SendValidationOutcome::TooManyThisHour => Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(FlowResponse::failure(
                messages::TOO_MANY_ATTEMPTS,
                Some(error_codes::MAX_TOTAL_EMAIL_VALIDATION_ATTEMPTS),
            )),
        )
            .into_response()),
        SendValidationOutcome::TooSoon { remaining_attempts } => Ok((
            StatusCode::TOO_MANY_REQUESTS,
            Json(FlowResponse::failure(
                format!(
                    "{remaining_attempts} attempts left. Please wait 1 minute before sending another email."
                ),
                Some(error_codes::MAX_TIME_EMAIL_VALIDATION_ATTEMPTS),
            )),
        )
            .into_response()),
        SendValidationOutcome::SendRejected { details } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure(
                format!("{} | {details}", messages::EMAIL_SEND_FAILURE),
                Some(error_codes::EMAIL_SEND_FAILURE),
            )),
        )
            .into_response()),
        SendValidationOutcome::ProviderDown { details } => Ok((
            StatusCode::BAD_REQUEST,
            Json(FlowResponse::failure(
                format!("{} | {details}", messages::MAILJET_FAILURE),
                Some(error_codes::MAILJET_SERVER_FAILURE),
            )),
        )
            .into_response()),
    }
}

/// GET /validate/{token}
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    session: Session,
) -> Result<Response, ApiError> {
    match state
        .identity
        .redeem_validation_token(&token, Utc::now())
        .await?
    {
        RedeemValidationOutcome::Validated { user } => {
            bind_session(&session, &user, true).await?;
            Ok(found(HOME_ROUTE))
        }
        RedeemValidationOutcome::Expired => {
            Ok(found(&format!("/validate/expired?token={token}")))
        }
        RedeemValidationOutcome::NotFound => Err(ApiError::NotFound),
    }
}

/// GET /validate/expired?token=
/// Friendliness landing: rotate the stored token, reset the counters,
/// and hand the user a bound session so they can ask for another email.
pub async fn validation_expired(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExpiredQuery>,
    session: Session,
) -> Result<Response, ApiError> {
    match state
        .identity
        .refresh_expired_validation(&query.token, Utc::now())
        .await?
    {
        ExpiredValidationOutcome::Refreshed { user } => {
            bind_session(&session, &user, false).await?;
            Ok(Json(FlowResponse::success(messages::VALIDATION_EXPIRED)).into_response())
        }
        ExpiredValidationOutcome::NotFound => Err(ApiError::NotFound),
    }
}
