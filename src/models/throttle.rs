//! Attempt-window bookkeeping for the two outbound-email regimes.
//!
//! These are advisory state machines: they decide whether another send is
//! allowed right now and mutate their counters, but never error. The
//! caller owns persistence and supplies the clock.

use chrono::{DateTime, Utc};

use crate::config::AuthConfig;

pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format_ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

/// Counter state for validation-email sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationThrottle {
    pub attempts: i32,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl ValidationThrottle {
    /// Count one send if the inter-send gap has elapsed.
    ///
    /// Returns `false` (leaving state untouched) while the previous send is
    /// within `wait_to_retry_before_max_attempts` of `now`.
    pub fn increment_attempt(&mut self, now: DateTime<Utc>, config: &AuthConfig) -> bool {
        if let Some(last) = self.last_attempt
            && (now - last).num_seconds() <= config.wait_to_retry_before_max_attempts
        {
            return false;
        }

        self.last_attempt = Some(now);
        self.attempts += 1;
        true
    }

    /// Whether the hourly cap is in force. Once the cool-down after the cap
    /// has fully elapsed the counter resets and sending is allowed again.
    pub fn has_too_many(&mut self, now: DateTime<Utc>, config: &AuthConfig) -> bool {
        let Some(last) = self.last_attempt else {
            return false;
        };

        if self.attempts < config.max_email_attempts_in_hour {
            return false;
        }

        if (now - last).num_seconds() >= config.wait_to_attempt_after_max_attempts {
            self.attempts = 0;
            return false;
        }

        true
    }

    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
        self.last_attempt = None;
    }
}

/// Counter state for password-reset sends, tracked over a rolling window
/// anchored at `initial_attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetThrottle {
    pub attempts: i32,
    pub initial_attempt: DateTime<Utc>,
    pub last_attempt: Option<DateTime<Utc>>,
}

impl ResetThrottle {
    #[must_use]
    pub fn is_allowed(&self, now: DateTime<Utc>, config: &AuthConfig) -> bool {
        if self.attempts >= config.password_reset_attempts {
            return false;
        }

        if let Some(last) = self.last_attempt
            && (now - last).num_seconds() < config.wait_to_retry_forgot_password_min
        {
            return false;
        }

        true
    }

    #[must_use]
    pub fn older_than_window(&self, now: DateTime<Utc>, config: &AuthConfig) -> bool {
        (now - self.initial_attempt).num_seconds() >= config.wait_to_retry_forgot_password_max
    }

    pub fn increment(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_attempt = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config() -> AuthConfig {
        AuthConfig::default()
    }

    #[test]
    fn test_first_increment_always_counts() {
        let now = Utc::now();
        let mut throttle = ValidationThrottle {
            attempts: 0,
            last_attempt: None,
        };

        assert!(throttle.increment_attempt(now, &config()));
        assert_eq!(throttle.attempts, 1);
        assert_eq!(throttle.last_attempt, Some(now));
    }

    #[test]
    fn test_increment_blocked_within_minute_gap() {
        let t = Utc::now();
        let mut throttle = ValidationThrottle {
            attempts: 2,
            last_attempt: Some(t),
        };

        // Exactly at the boundary still counts as "too soon".
        let mut at_boundary = throttle.clone();
        assert!(!at_boundary.increment_attempt(t + Duration::seconds(60), &config()));
        assert_eq!(at_boundary.attempts, 2);

        // Just past the boundary the attempt lands.
        let now = t + Duration::seconds(61);
        assert!(throttle.increment_attempt(now, &config()));
        assert_eq!(throttle.attempts, 3);
        assert_eq!(throttle.last_attempt, Some(now));
    }

    #[test]
    fn test_has_too_many_under_cap() {
        let t = Utc::now();
        let mut throttle = ValidationThrottle {
            attempts: 4,
            last_attempt: Some(t),
        };
        assert!(!throttle.has_too_many(t + Duration::seconds(1), &config()));

        let mut fresh = ValidationThrottle {
            attempts: 5,
            last_attempt: None,
        };
        assert!(!fresh.has_too_many(t, &config()));
    }

    #[test]
    fn test_has_too_many_at_cap_within_cooldown() {
        let t = Utc::now();
        let mut throttle = ValidationThrottle {
            attempts: 5,
            last_attempt: Some(t),
        };
        assert!(throttle.has_too_many(t + Duration::seconds(3599), &config()));
        assert_eq!(throttle.attempts, 5);
    }

    #[test]
    fn test_has_too_many_resets_after_cooldown() {
        let t = Utc::now();
        let mut throttle = ValidationThrottle {
            attempts: 5,
            last_attempt: Some(t),
        };
        assert!(!throttle.has_too_many(t + Duration::seconds(3600), &config()));
        assert_eq!(throttle.attempts, 0);
    }

    #[test]
    fn test_reset_attempts_clears_state() {
        let mut throttle = ValidationThrottle {
            attempts: 5,
            last_attempt: Some(Utc::now()),
        };
        throttle.reset_attempts();
        assert_eq!(throttle.attempts, 0);
        assert!(throttle.last_attempt.is_none());
    }

    #[test]
    fn test_reset_throttle_blocked_within_minute() {
        let t = Utc::now();
        let throttle = ResetThrottle {
            attempts: 1,
            initial_attempt: t,
            last_attempt: Some(t),
        };
        assert!(!throttle.is_allowed(t + Duration::seconds(59), &config()));
        assert!(throttle.is_allowed(t + Duration::seconds(60), &config()));
    }

    #[test]
    fn test_reset_throttle_blocked_at_cap() {
        let t = Utc::now();
        let throttle = ResetThrottle {
            attempts: 5,
            initial_attempt: t,
            last_attempt: Some(t - Duration::seconds(600)),
        };
        assert!(!throttle.is_allowed(t, &config()));
    }

    #[test]
    fn test_reset_window_age() {
        let t = Utc::now();
        let throttle = ResetThrottle {
            attempts: 3,
            initial_attempt: t,
            last_attempt: None,
        };
        assert!(!throttle.older_than_window(t + Duration::seconds(3599), &config()));
        assert!(throttle.older_than_window(t + Duration::seconds(3600), &config()));
    }

    #[test]
    fn test_reset_increment_updates_both_fields() {
        let t = Utc::now();
        let mut throttle = ResetThrottle {
            attempts: 0,
            initial_attempt: t,
            last_attempt: None,
        };
        let now = t + Duration::seconds(120);
        throttle.increment(now);
        assert_eq!(throttle.attempts, 1);
        assert_eq!(throttle.last_attempt, Some(now));
        assert_eq!(throttle.initial_attempt, t);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let parsed = parse_ts(&format_ts(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
        assert!(parse_ts("not a timestamp").is_none());
    }
}
