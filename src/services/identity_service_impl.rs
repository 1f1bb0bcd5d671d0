//! `SeaORM` implementation of the [`IdentityService`] trait.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::api::NotificationEvent;
use crate::clients::{MailResult, Mailer};
use crate::config::Config;
use crate::constants::messages;
use crate::db::repositories::{email_validation, forgot_password};
use crate::db::{CreateUserError, Store, User};
use crate::models::forms::{
    FIELD_EMAIL, FIELD_USERNAME, FieldErrors, LoginInput, RegisterInput, ResetPasswordInput,
    is_valid_email,
};
use crate::services::identity_service::{
    ExpiredValidationOutcome, ForgotPasswordOutcome, IdentityError, IdentityService, LoginOutcome,
    RedeemValidationOutcome, RegisterOutcome, ResetPasswordOutcome, ResetTokenCheck,
    SendValidationOutcome,
};
use crate::token::{TokenCodec, TokenPurpose};

pub struct SeaOrmIdentityService {
    store: Store,
    tokens: TokenCodec,
    mailer: Arc<dyn Mailer>,
    config: Config,
    event_bus: broadcast::Sender<NotificationEvent>,
}

impl SeaOrmIdentityService {
    #[must_use]
    pub fn new(
        store: Store,
        tokens: TokenCodec,
        mailer: Arc<dyn Mailer>,
        config: Config,
        event_bus: broadcast::Sender<NotificationEvent>,
    ) -> Self {
        Self {
            store,
            tokens,
            mailer,
            config,
            event_bus,
        }
    }

    fn validation_url(&self, token: &str) -> String {
        format!("{}/validate/{token}", self.config.server.base_url)
    }

    fn reset_url(&self, token: &str) -> String {
        format!("{}/reset-password/{token}", self.config.server.base_url)
    }

    fn issue_validation_token(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, IdentityError> {
        Ok(self.tokens.issue(
            username,
            TokenPurpose::ValidateEmail,
            self.config.auth.wait_to_attempt_after_max_attempts,
            now,
        )?)
    }

    fn issue_reset_token(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<String, IdentityError> {
        Ok(self.tokens.issue(
            username,
            TokenPurpose::ResetPassword,
            self.config.auth.wait_to_retry_forgot_password_max,
            now,
        )?)
    }
}

fn classify_send(result: &MailResult) -> Option<SendValidationOutcome> {
    if result.is_success() {
        return None;
    }

    let details = result.error_details();
    if result.is_server_error() {
        Some(SendValidationOutcome::ProviderDown { details })
    } else {
        Some(SendValidationOutcome::SendRejected { details })
    }
}

#[async_trait::async_trait]
impl IdentityService for SeaOrmIdentityService {
    async fn register(
        &self,
        input: RegisterInput,
        now: DateTime<Utc>,
    ) -> Result<RegisterOutcome, IdentityError> {
        let mut errors: FieldErrors = input.validate(&self.config.auth);

        if self
            .store
            .find_user_by_username(&input.username)
            .await?
            .is_some()
        {
            errors
                .entry(FIELD_USERNAME)
                .or_default()
                .push(messages::USERNAME_TAKEN.to_string());
        }

        let email_lower = input.email.to_lowercase();
        let mut unvalidated_owner: Option<User> = None;
        if let Some(owner) = self.store.find_user_by_email(&email_lower).await? {
            if self.store.is_email_validated(owner.id).await? {
                errors
                    .entry(FIELD_EMAIL)
                    .or_default()
                    .push(messages::EMAIL_TAKEN.to_string());
            } else {
                // Deliberately NOT added to the error map: alongside other
                // errors it would leak that this email has a pending
                // account. It only surfaces when it is the sole problem.
                unvalidated_owner = Some(owner);
            }
        }

        if let Some(owner) = unvalidated_owner
            && errors.is_empty()
        {
            return Ok(RegisterOutcome::UnvalidatedAccountExists { user: owner });
        }

        if !errors.is_empty() {
            return Ok(RegisterOutcome::Invalid { errors });
        }

        let user = match self
            .store
            .create_user(
                &input.username,
                &email_lower,
                &input.password,
                &self.config.security,
                now,
            )
            .await
        {
            Ok(user) => user,
            // Lost a race with a concurrent registration.
            Err(CreateUserError::DuplicateUsername) => {
                let mut errors = FieldErrors::new();
                errors
                    .entry(FIELD_USERNAME)
                    .or_default()
                    .push(messages::USERNAME_TAKEN.to_string());
                return Ok(RegisterOutcome::Invalid { errors });
            }
            Err(CreateUserError::DuplicateEmail) => {
                let mut errors = FieldErrors::new();
                errors
                    .entry(FIELD_EMAIL)
                    .or_default()
                    .push(messages::EMAIL_TAKEN.to_string());
                return Ok(RegisterOutcome::Invalid { errors });
            }
            Err(CreateUserError::Other(err)) => return Err(err.into()),
        };

        let token = self.issue_validation_token(&user.username, now)?;
        self.store
            .attach_email_validation(user.id, &token, now)
            .await?;

        info!(user_id = user.id, username = %user.username, "New account registered");

        Ok(RegisterOutcome::Created { user })
    }

    async fn login(
        &self,
        input: LoginInput,
        _now: DateTime<Utc>,
    ) -> Result<LoginOutcome, IdentityError> {
        let errors = input.validate();
        if !errors.is_empty() {
            return Ok(LoginOutcome::Invalid { errors });
        }

        let user = self.store.find_user_by_username(&input.username).await?;

        let Some(user) = user else {
            let mut errors = FieldErrors::new();
            errors
                .entry(FIELD_USERNAME)
                .or_default()
                .push(messages::USER_NOT_EXIST.to_string());
            return Ok(LoginOutcome::BadCredentials { errors });
        };

        if !self
            .store
            .verify_user_password(&user.username, &input.password)
            .await?
        {
            let mut errors = FieldErrors::new();
            errors
                .entry(crate::models::forms::FIELD_PASSWORD)
                .or_default()
                .push(messages::INVALID_PASSWORD.to_string());
            return Ok(LoginOutcome::BadCredentials { errors });
        }

        if !self.store.is_email_validated(user.id).await? {
            return Ok(LoginOutcome::EmailNotValidated { user });
        }

        Ok(LoginOutcome::Success { user })
    }

    async fn send_validation_email(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<SendValidationOutcome, IdentityError> {
        let Some(row) = self.store.get_email_validation(user_id).await? else {
            return Ok(SendValidationOutcome::MissingValidation);
        };

        if row.is_validated {
            // Stale row from an interrupted validation commit.
            self.store.delete_email_validation(user_id).await?;
            return Ok(SendValidationOutcome::AlreadyValidated);
        }

        let mut throttle = email_validation::throttle_of(&row);

        if throttle.has_too_many(now, &self.config.auth) {
            return Ok(SendValidationOutcome::TooManyThisHour);
        }

        if !throttle.increment_attempt(now, &self.config.auth) {
            return Ok(SendValidationOutcome::TooSoon {
                remaining_attempts: self.config.auth.max_email_attempts_in_hour - throttle.attempts,
            });
        }

        // The counter must be durable before the provider is contacted:
        // a send-then-crash may drop an email but never under-counts.
        // Losing the guarded write means a concurrent request already
        // counted this window, so this one reads as rate-limited.
        let won = self
            .store
            .update_email_validation_guarded(user_id, row.last_attempt.as_deref(), &throttle)
            .await?;
        if !won {
            return Ok(SendValidationOutcome::TooSoon {
                remaining_attempts: self.config.auth.max_email_attempts_in_hour - throttle.attempts,
            });
        }

        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Ok(SendValidationOutcome::MissingValidation);
        };

        let url = self.validation_url(&row.validation_token);
        let result = self
            .mailer
            .send_confirmation(&user.email, &user.username, &url)
            .await;

        match result {
            Ok(result) => match classify_send(&result) {
                None => Ok(SendValidationOutcome::Sent),
                Some(outcome) => {
                    warn!(
                        user_id,
                        status = result.status_code,
                        "Validation email send failed"
                    );
                    Ok(outcome)
                }
            },
            Err(err) => {
                warn!(user_id, error = %err, "Validation email transport error");
                Ok(SendValidationOutcome::ProviderDown {
                    details: err.to_string(),
                })
            }
        }
    }

    async fn redeem_validation_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RedeemValidationOutcome, IdentityError> {
        let verification = self.tokens.verify(token, TokenPurpose::ValidateEmail, now);

        if verification.expired {
            return Ok(RedeemValidationOutcome::Expired);
        }

        let Some(subject) = verification.subject else {
            // Undecodable token: whoever it was minted for can never
            // validate, so their half-created accounts are removed.
            let purged = self.store.purge_users_by_validation_token(token).await?;
            if purged > 0 {
                info!(purged, "Purged accounts holding an undecodable validation token");
            }
            return Ok(RedeemValidationOutcome::NotFound);
        };

        let Some(user) = self.store.find_user_by_username(&subject).await? else {
            return Ok(RedeemValidationOutcome::NotFound);
        };

        let Some(row) = self.store.get_email_validation(user.id).await? else {
            // Already redeemed; a second presenter gets a 404.
            return Ok(RedeemValidationOutcome::NotFound);
        };

        // A non-matching stored token means a later re-issue or tampering.
        if row.validation_token != token {
            return Ok(RedeemValidationOutcome::NotFound);
        }

        self.store.complete_email_validation(user.id, now).await?;

        let _ = self.event_bus.send(NotificationEvent::UserValidated {
            user_id: user.id,
            username: user.username.clone(),
        });

        info!(user_id = user.id, username = %user.username, "Email validated");

        Ok(RedeemValidationOutcome::Validated { user })
    }

    async fn refresh_expired_validation(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ExpiredValidationOutcome, IdentityError> {
        let Some(row) = self.store.find_email_validation_by_token(token).await? else {
            return Ok(ExpiredValidationOutcome::NotFound);
        };

        let Some(user) = self.store.find_user_by_id(row.user_id).await? else {
            return Ok(ExpiredValidationOutcome::NotFound);
        };

        let fresh = self.issue_validation_token(&user.username, now)?;

        let mut throttle = email_validation::throttle_of(&row);
        throttle.reset_attempts();

        self.store
            .update_email_validation(user.id, Some(&fresh), &throttle)
            .await?;

        info!(user_id = user.id, "Expired validation token refreshed");

        Ok(ExpiredValidationOutcome::Refreshed { user })
    }

    async fn forgot_password(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<ForgotPasswordOutcome, IdentityError> {
        if !is_valid_email(email) {
            let mut errors = FieldErrors::new();
            errors
                .entry(FIELD_EMAIL)
                .or_default()
                .push(messages::EMAIL_NOT_VALID.to_string());
            return Ok(ForgotPasswordOutcome::Invalid { errors });
        }

        let email_lower = email.to_lowercase();

        let Some(user) = self.store.find_user_by_email(&email_lower).await? else {
            return Ok(ForgotPasswordOutcome::Neutral);
        };

        // Unvalidated accounts never get reset emails, and no row is
        // created for them.
        if !self.store.is_email_validated(user.id).await? {
            return Ok(ForgotPasswordOutcome::Neutral);
        }

        let row = match self.store.get_forgot_password(user.id).await? {
            None => {
                let token = self.issue_reset_token(&user.username, now)?;
                self.store
                    .attach_forgot_password(user.id, &token, now)
                    .await?;
                self.store
                    .get_forgot_password(user.id)
                    .await?
                    .ok_or_else(|| {
                        IdentityError::Internal("forgot password row vanished".to_string())
                    })?
            }
            Some(row) => {
                let throttle = forgot_password::throttle_of(&row);
                if throttle.is_allowed(now, &self.config.auth)
                    && throttle.older_than_window(now, &self.config.auth)
                {
                    // Stale window: rotate the token and start a new one.
                    let token = self.issue_reset_token(&user.username, now)?;
                    let fresh = crate::models::throttle::ResetThrottle {
                        attempts: 0,
                        initial_attempt: now,
                        last_attempt: None,
                    };
                    self.store
                        .update_forgot_password(user.id, Some(&token), &fresh)
                        .await?;
                    self.store
                        .get_forgot_password(user.id)
                        .await?
                        .ok_or_else(|| {
                            IdentityError::Internal("forgot password row vanished".to_string())
                        })?
                } else {
                    row
                }
            }
        };

        let mut throttle = forgot_password::throttle_of(&row);
        if throttle.is_allowed(now, &self.config.auth) {
            throttle.increment(now);
            self.store
                .update_forgot_password(user.id, None, &throttle)
                .await?;

            let url = self.reset_url(&row.reset_token);
            let result = self
                .mailer
                .send_password_reset(&user.email, &user.username, &url)
                .await;

            match result {
                Ok(result) if result.is_server_error() => {
                    return Ok(ForgotPasswordOutcome::ProviderDown {
                        details: result.error_details(),
                    });
                }
                Ok(result) if !result.is_success() => {
                    // A 4xx is swallowed: surfacing it would break the
                    // neutral response.
                    warn!(
                        user_id = user.id,
                        status = result.status_code,
                        "Reset email send rejected"
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    return Ok(ForgotPasswordOutcome::ProviderDown {
                        details: err.to_string(),
                    });
                }
            }
        }

        Ok(ForgotPasswordOutcome::Neutral)
    }

    async fn check_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<ResetTokenCheck, IdentityError> {
        let verification = self.tokens.verify(token, TokenPurpose::ResetPassword, now);

        if verification.expired {
            return if self.store.delete_forgot_password_by_token(token).await? {
                Ok(ResetTokenCheck::ExpiredCleaned)
            } else {
                Ok(ResetTokenCheck::NotFound)
            };
        }

        let Some(subject) = verification.subject else {
            return Ok(ResetTokenCheck::NotFound);
        };

        let Some(user) = self.store.find_user_by_username(&subject).await? else {
            return Ok(ResetTokenCheck::NotFound);
        };

        // A reset for an unvalidated email is never honored; drop any row.
        if !self.store.is_email_validated(user.id).await? {
            self.store.delete_forgot_password(user.id).await?;
            return Ok(ResetTokenCheck::NotFound);
        }

        let Some(row) = self.store.get_forgot_password(user.id).await? else {
            return Ok(ResetTokenCheck::NotFound);
        };

        if row.reset_token != token {
            return Ok(ResetTokenCheck::NotFound);
        }

        let throttle = forgot_password::throttle_of(&row);
        if throttle.older_than_window(now, &self.config.auth) {
            return Ok(ResetTokenCheck::NotFound);
        }

        Ok(ResetTokenCheck::Valid { user })
    }

    async fn reset_password(
        &self,
        token: &str,
        input: ResetPasswordInput,
        now: DateTime<Utc>,
    ) -> Result<ResetPasswordOutcome, IdentityError> {
        let user = match self.check_reset_token(token, now).await? {
            ResetTokenCheck::Valid { user } => user,
            ResetTokenCheck::ExpiredCleaned => return Ok(ResetPasswordOutcome::ExpiredCleaned),
            ResetTokenCheck::NotFound => return Ok(ResetPasswordOutcome::NotFound),
        };

        let errors = input.validate(&self.config.auth);
        if !errors.is_empty() {
            return Ok(ResetPasswordOutcome::Invalid { errors });
        }

        self.store
            .change_password(user.id, &input.new_password, &self.config.security)
            .await?;
        self.store.delete_forgot_password(user.id).await?;

        info!(user_id = user.id, "Password reset completed");

        Ok(ResetPasswordOutcome::Done)
    }
}
