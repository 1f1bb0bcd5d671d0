//! Form inputs for the identity flows and their field-level validators.
//!
//! Each flow has an enumerated set of recognized fields with independent
//! validators producing a `{field: [messages]}` map. An empty map means
//! the form is valid.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::config::AuthConfig;
use crate::constants::messages;

pub type FieldErrors = BTreeMap<&'static str, Vec<String>>;

pub const FIELD_USERNAME: &str = "username";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_CONFIRM_EMAIL: &str = "confirm_email";
pub const FIELD_PASSWORD: &str = "password";
pub const FIELD_CONFIRM_PASSWORD: &str = "confirm_password";
pub const FIELD_NEW_PASSWORD: &str = "new_password";
pub const FIELD_CONFIRM_NEW_PASSWORD: &str = "confirm_new_password";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex is valid"));

const MAX_EMAIL_LENGTH: usize = 120;

/// Strip control characters and surrounding whitespace. A field passes
/// sanitization only when this returns the input unchanged.
#[must_use]
pub fn sanitized(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.len() <= MAX_EMAIL_LENGTH && EMAIL_RE.is_match(email)
}

fn push_error(errors: &mut FieldErrors, field: &'static str, message: impl Into<String>) {
    errors.entry(field).or_default().push(message.into());
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub confirm_email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterInput {
    /// Shape-only validation; uniqueness is the flow's concern.
    #[must_use]
    pub fn validate(&self, auth: &AuthConfig) -> FieldErrors {
        let mut errors = FieldErrors::new();

        let username_len = self.username.chars().count();
        if username_len < auth.min_username_length || username_len > auth.max_username_length {
            push_error(
                &mut errors,
                FIELD_USERNAME,
                format!(
                    "Username must be between {} and {} characters.",
                    auth.min_username_length, auth.max_username_length
                ),
            );
        } else if sanitized(&self.username) != self.username {
            push_error(
                &mut errors,
                FIELD_USERNAME,
                "Username contains invalid characters.",
            );
        }

        if !is_valid_email(&self.email) {
            push_error(&mut errors, FIELD_EMAIL, messages::EMAIL_NOT_VALID);
        }
        if self.email != self.confirm_email {
            push_error(&mut errors, FIELD_CONFIRM_EMAIL, "Emails do not match.");
        }

        let password_len = self.password.chars().count();
        if password_len < auth.min_password_length || password_len > auth.max_password_length {
            push_error(
                &mut errors,
                FIELD_PASSWORD,
                format!(
                    "Password must be between {} and {} characters.",
                    auth.min_password_length, auth.max_password_length
                ),
            );
        }
        if self.password != self.confirm_password {
            push_error(
                &mut errors,
                FIELD_CONFIRM_PASSWORD,
                "Passwords do not match.",
            );
        }

        errors
    }
}

#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username: String,
    pub password: String,
}

impl LoginInput {
    #[must_use]
    pub fn validate(&self) -> FieldErrors {
        let mut errors = FieldErrors::new();

        if self.username.is_empty() {
            push_error(&mut errors, FIELD_USERNAME, "Username is required.");
        }
        if self.password.is_empty() {
            push_error(&mut errors, FIELD_PASSWORD, "Password is required.");
        }

        errors
    }
}

#[derive(Debug, Clone)]
pub struct ResetPasswordInput {
    pub new_password: String,
    pub confirm_new_password: String,
}

impl ResetPasswordInput {
    #[must_use]
    pub fn validate(&self, auth: &AuthConfig) -> FieldErrors {
        let mut errors = FieldErrors::new();

        let password_len = self.new_password.chars().count();
        if password_len < auth.min_password_length || password_len > auth.max_password_length {
            push_error(
                &mut errors,
                FIELD_NEW_PASSWORD,
                format!(
                    "Password must be between {} and {} characters.",
                    auth.min_password_length, auth.max_password_length
                ),
            );
        }
        if self.new_password != self.confirm_new_password {
            push_error(
                &mut errors,
                FIELD_CONFIRM_NEW_PASSWORD,
                "Passwords do not match.",
            );
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> AuthConfig {
        AuthConfig::default()
    }

    fn valid_register() -> RegisterInput {
        RegisterInput {
            username: "FakeUserName1234".to_string(),
            email: "fakeusername123@email.com".to_string(),
            confirm_email: "fakeusername123@email.com".to_string(),
            password: "FakePassword1234".to_string(),
            confirm_password: "FakePassword1234".to_string(),
        }
    }

    #[test]
    fn test_valid_register_input() {
        assert!(valid_register().validate(&auth()).is_empty());
    }

    #[test]
    fn test_username_bounds() {
        let mut input = valid_register();
        input.username = "ab".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_USERNAME));

        input.username = "a".repeat(21);
        assert!(input.validate(&auth()).contains_key(FIELD_USERNAME));
    }

    #[test]
    fn test_username_sanitization() {
        let mut input = valid_register();
        input.username = " padded name ".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_USERNAME));

        input.username = "tab\there".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_USERNAME));
    }

    #[test]
    fn test_email_syntax_and_match() {
        let mut input = valid_register();
        input.email = "not-an-email".to_string();
        input.confirm_email = "not-an-email".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_EMAIL));

        let mut input = valid_register();
        input.confirm_email = "other@email.com".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_CONFIRM_EMAIL));
    }

    #[test]
    fn test_email_length_cap() {
        let mut input = valid_register();
        input.email = format!("{}@example.com", "a".repeat(120));
        input.confirm_email = input.email.clone();
        assert!(input.validate(&auth()).contains_key(FIELD_EMAIL));
    }

    #[test]
    fn test_password_bounds_and_match() {
        let mut input = valid_register();
        input.password = "short".to_string();
        input.confirm_password = "short".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_PASSWORD));

        let mut input = valid_register();
        input.confirm_password = "SomethingElse123".to_string();
        assert!(input.validate(&auth()).contains_key(FIELD_CONFIRM_PASSWORD));
    }

    #[test]
    fn test_login_requires_both_fields() {
        let input = LoginInput {
            username: String::new(),
            password: String::new(),
        };
        let errors = input.validate();
        assert!(errors.contains_key(FIELD_USERNAME));
        assert!(errors.contains_key(FIELD_PASSWORD));
    }

    #[test]
    fn test_reset_password_validation() {
        let input = ResetPasswordInput {
            new_password: "NEW_PASSWORD!".to_string(),
            confirm_new_password: "NEW_PASSWORD!".to_string(),
        };
        assert!(input.validate(&auth()).is_empty());

        let input = ResetPasswordInput {
            new_password: "NEW_PASSWORD!".to_string(),
            confirm_new_password: "different!".to_string(),
        };
        assert!(
            input
                .validate(&auth())
                .contains_key(FIELD_CONFIRM_NEW_PASSWORD)
        );
    }
}
