use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::forgot_passwords;
use crate::models::throttle::{ResetThrottle, format_ts, parse_ts};

pub struct ForgotPasswordRepository {
    conn: DatabaseConnection,
}

impl ForgotPasswordRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create the row for a freshly requested reset window.
    pub async fn attach(&self, user_id: i32, token: &str, now: DateTime<Utc>) -> Result<()> {
        let active = forgot_passwords::ActiveModel {
            user_id: Set(user_id),
            reset_token: Set(token.to_string()),
            attempts: Set(0),
            initial_attempt: Set(format_ts(now)),
            last_attempt: Set(None),
            created_at: Set(format_ts(now)),
        };

        active
            .insert(&self.conn)
            .await
            .context("Failed to insert forgot password")?;

        Ok(())
    }

    pub async fn get(&self, user_id: i32) -> Result<Option<forgot_passwords::Model>> {
        forgot_passwords::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query forgot password")
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Option<forgot_passwords::Model>> {
        forgot_passwords::Entity::find()
            .filter(forgot_passwords::Column::ResetToken.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query forgot password by token")
    }

    pub async fn delete(&self, user_id: i32) -> Result<()> {
        forgot_passwords::Entity::delete_by_id(user_id)
            .exec(&self.conn)
            .await
            .context("Failed to delete forgot password")?;
        Ok(())
    }

    /// Delete the row carrying `token`; reports whether one existed.
    pub async fn delete_by_token(&self, token: &str) -> Result<bool> {
        let result = forgot_passwords::Entity::delete_many()
            .filter(forgot_passwords::Column::ResetToken.eq(token))
            .exec(&self.conn)
            .await
            .context("Failed to delete forgot password by token")?;

        Ok(result.rows_affected > 0)
    }

    /// Persist new throttle state, optionally rotating the token and
    /// re-anchoring the window.
    pub async fn update(
        &self,
        user_id: i32,
        token: Option<&str>,
        throttle: &ResetThrottle,
    ) -> Result<()> {
        let row = forgot_passwords::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query forgot password for update")?
            .ok_or_else(|| anyhow::anyhow!("Forgot password not found for user {user_id}"))?;

        let mut active: forgot_passwords::ActiveModel = row.into();
        if let Some(token) = token {
            active.reset_token = Set(token.to_string());
        }
        active.attempts = Set(throttle.attempts);
        active.initial_attempt = Set(format_ts(throttle.initial_attempt));
        active.last_attempt = Set(throttle.last_attempt.map(format_ts));
        active.update(&self.conn).await?;

        Ok(())
    }
}

/// Throttle view of a stored row. An unparseable `initial_attempt` is
/// treated as the epoch so the row reads as stale rather than fresh.
#[must_use]
pub fn throttle_of(row: &forgot_passwords::Model) -> ResetThrottle {
    ResetThrottle {
        attempts: row.attempts,
        initial_attempt: parse_ts(&row.initial_attempt).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        last_attempt: row.last_attempt.as_deref().and_then(parse_ts),
    }
}
