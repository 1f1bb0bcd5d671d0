//! Domain service for the identity lifecycle.
//!
//! Registration, login, email validation, and password reset. Each flow
//! returns a typed outcome that the HTTP layer maps onto status codes,
//! session binding, and redirects; only infrastructure failures surface
//! as errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::User;
use crate::models::forms::{FieldErrors, LoginInput, RegisterInput, ResetPasswordInput};

/// Errors specific to identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for IdentityError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for IdentityError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug)]
pub enum RegisterOutcome {
    /// Account created, validation row attached; caller binds a session.
    Created { user: User },

    /// The only problem with the form was an existing unvalidated account
    /// under that email. Caller binds a session for that account so it can
    /// immediately request a fresh validation email.
    UnvalidatedAccountExists { user: User },

    Invalid { errors: FieldErrors },
}

#[derive(Debug)]
pub enum LoginOutcome {
    Success { user: User },

    /// Credentials were right but the email is unvalidated. The caller
    /// still binds a session so the resend flow works.
    EmailNotValidated { user: User },

    /// Missing fields; a 400-class form error.
    Invalid { errors: FieldErrors },

    /// Unknown user or wrong password; a 401-class error.
    BadCredentials { errors: FieldErrors },
}

#[derive(Debug)]
pub enum SendValidationOutcome {
    Sent,

    /// The stored row already reads validated; it has been removed.
    AlreadyValidated,

    /// No validation row exists for this user.
    MissingValidation,

    /// Hourly cap in force.
    TooManyThisHour,

    /// Inter-send gap not elapsed.
    TooSoon { remaining_attempts: i32 },

    /// Provider rejected the send (4xx). The attempt still counts.
    SendRejected { details: String },

    /// Provider failure (5xx) or transport error. The attempt still counts.
    ProviderDown { details: String },
}

#[derive(Debug)]
pub enum RedeemValidationOutcome {
    Validated { user: User },

    /// Token is well-formed but past expiry; the expired landing takes over.
    Expired,

    NotFound,
}

#[derive(Debug)]
pub enum ExpiredValidationOutcome {
    /// A fresh token was issued and counters reset; caller re-binds a session.
    Refreshed { user: User },

    NotFound,
}

#[derive(Debug)]
pub enum ForgotPasswordOutcome {
    /// The deliberately indistinguishable success response.
    Neutral,

    Invalid { errors: FieldErrors },

    /// Mailjet 5xx; the one non-neutral branch the flow permits.
    ProviderDown { details: String },
}

#[derive(Debug)]
pub enum ResetTokenCheck {
    Valid { user: User },

    /// Token expired; its row has been deleted.
    ExpiredCleaned,

    NotFound,
}

#[derive(Debug)]
pub enum ResetPasswordOutcome {
    /// Password changed, row deleted. No session is bound.
    Done,

    Invalid { errors: FieldErrors },

    ExpiredCleaned,

    NotFound,
}

/// Domain service trait for the identity flows.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Register a new account, including the uniqueness checks.
    async fn register(
        &self,
        input: RegisterInput,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome, IdentityError>;

    /// Verify credentials.
    async fn login(
        &self,
        input: LoginInput,
        now: DateTime<Utc>,
    ) -> Result<LoginOutcome, IdentityError>;

    /// Send (or resend) the validation email for the given user, applying
    /// the email-validation rate-limit regime. Counter writes commit
    /// before the provider is contacted.
    async fn send_validation_email(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<SendValidationOutcome, IdentityError>;

    /// Redeem a validation token from a link.
    async fn redeem_validation_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RedeemValidationOutcome, IdentityError>;

    /// Expired-token landing: rotate the stored token and reset counters.
    async fn refresh_expired_validation(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ExpiredValidationOutcome, IdentityError>;

    /// Request a password-reset email. Anti-enumeration: every branch that
    /// could reveal whether the email exists returns `Neutral`.
    async fn forgot_password(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ForgotPasswordOutcome, IdentityError>;

    /// Validate a reset token ahead of rendering the form.
    async fn check_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetTokenCheck, IdentityError>;

    /// Complete a password reset.
    async fn reset_password(
        &self,
        token: &str,
        input: ResetPasswordInput,
        now: DateTime<Utc>,
    ) -> Result<ResetPasswordOutcome, IdentityError>;
}
