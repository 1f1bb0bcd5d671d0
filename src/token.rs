//! Signed bearer tokens for the email-validation and password-reset flows.
//!
//! Tokens are HS256 JWTs carrying the username as subject, a purpose tag,
//! and an expiry. The purpose tag keeps the two token classes from being
//! substituted for each other. Expiry is checked against the caller's
//! clock, not transport metadata, so tests can inject a fake "now".

use anyhow::Result;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    ValidateEmail,
    ResetPassword,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    purpose: TokenPurpose,
    exp: i64,
}

/// Outcome of [`TokenCodec::verify`]: `(subject | none, expired)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub subject: Option<String>,
    pub expired: bool,
}

impl Verification {
    const fn rejected() -> Self {
        Self {
            subject: None,
            expired: false,
        }
    }
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenCodec {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(
        &self,
        subject: &str,
        purpose: TokenPurpose,
        ttl_seconds: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let claims = Claims {
            sub: subject.to_string(),
            purpose,
            exp: now.timestamp() + ttl_seconds,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| anyhow::anyhow!("Failed to sign token: {e}"))
    }

    /// Decode failures and purpose mismatches are indistinguishable to the
    /// caller: both come back as `(None, false)`. Only a well-formed,
    /// purpose-matching token past its embedded expiry reports `expired`.
    #[must_use]
    pub fn verify(
        &self,
        token: &str,
        expected_purpose: TokenPurpose,
        now: DateTime<Utc>,
    ) -> Verification {
        // Expiry is evaluated manually against the injected clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let Ok(data) = decode::<Claims>(token, &self.decoding, &validation) else {
            return Verification::rejected();
        };

        if data.claims.purpose != expected_purpose {
            return Verification::rejected();
        }

        if now.timestamp() >= data.claims.exp {
            return Verification {
                subject: None,
                expired: true,
            };
        }

        Verification {
            subject: Some(data.claims.sub),
            expired: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn codec() -> TokenCodec {
        TokenCodec::new("unit-test-secret")
    }

    #[test]
    fn test_round_trip_within_ttl() {
        let now = Utc::now();
        let token = codec()
            .issue("FakeUserName1234", TokenPurpose::ValidateEmail, 3600, now)
            .unwrap();

        let result = codec().verify(&token, TokenPurpose::ValidateEmail, now);
        assert_eq!(result.subject.as_deref(), Some("FakeUserName1234"));
        assert!(!result.expired);
    }

    #[test]
    fn test_expired_token_reports_expired() {
        let now = Utc::now();
        let token = codec()
            .issue("someone", TokenPurpose::ValidateEmail, 3600, now)
            .unwrap();

        let later = now + Duration::seconds(3600);
        let result = codec().verify(&token, TokenPurpose::ValidateEmail, later);
        assert!(result.subject.is_none());
        assert!(result.expired);
    }

    #[test]
    fn test_purpose_mismatch_is_rejected_not_expired() {
        let now = Utc::now();
        let token = codec()
            .issue("someone", TokenPurpose::ValidateEmail, 3600, now)
            .unwrap();

        let result = codec().verify(&token, TokenPurpose::ResetPassword, now);
        assert!(result.subject.is_none());
        assert!(!result.expired);

        // Even once expired, a wrong-purpose token never reports expiry.
        let later = now + Duration::seconds(7200);
        let result = codec().verify(&token, TokenPurpose::ResetPassword, later);
        assert!(result.subject.is_none());
        assert!(!result.expired);
    }

    #[test]
    fn test_garbage_and_wrong_key_are_rejected() {
        let now = Utc::now();

        let result = codec().verify("not-a-token", TokenPurpose::ValidateEmail, now);
        assert!(result.subject.is_none());
        assert!(!result.expired);

        let other = TokenCodec::new("different-secret");
        let token = other
            .issue("someone", TokenPurpose::ValidateEmail, 3600, now)
            .unwrap();
        let result = codec().verify(&token, TokenPurpose::ValidateEmail, now);
        assert!(result.subject.is_none());
        assert!(!result.expired);
    }
}
