use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};

use crate::entities::{email_validations, users};
use crate::models::throttle::{ValidationThrottle, format_ts, parse_ts};

pub struct EmailValidationRepository {
    conn: DatabaseConnection,
}

impl EmailValidationRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create the row that marks the account as unvalidated.
    pub async fn attach(&self, user_id: i32, token: &str, now: DateTime<Utc>) -> Result<()> {
        let active = email_validations::ActiveModel {
            user_id: Set(user_id),
            validation_token: Set(token.to_string()),
            is_validated: Set(false),
            attempts: Set(0),
            created_at: Set(format_ts(now)),
            last_attempt: Set(None),
            validated_at: Set(None),
        };

        active
            .insert(&self.conn)
            .await
            .context("Failed to insert email validation")?;

        Ok(())
    }

    pub async fn get(&self, user_id: i32) -> Result<Option<email_validations::Model>> {
        email_validations::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query email validation")
    }

    pub async fn get_by_token(&self, token: &str) -> Result<Option<email_validations::Model>> {
        email_validations::Entity::find()
            .filter(email_validations::Column::ValidationToken.eq(token))
            .one(&self.conn)
            .await
            .context("Failed to query email validation by token")
    }

    pub async fn delete(&self, user_id: i32) -> Result<()> {
        email_validations::Entity::delete_by_id(user_id)
            .exec(&self.conn)
            .await
            .context("Failed to delete email validation")?;
        Ok(())
    }

    /// Persist new throttle state, optionally rotating the token.
    pub async fn update(
        &self,
        user_id: i32,
        token: Option<&str>,
        throttle: &ValidationThrottle,
    ) -> Result<()> {
        let row = email_validations::Entity::find_by_id(user_id)
            .one(&self.conn)
            .await
            .context("Failed to query email validation for update")?
            .ok_or_else(|| anyhow::anyhow!("Email validation not found for user {user_id}"))?;

        let mut active: email_validations::ActiveModel = row.into();
        if let Some(token) = token {
            active.validation_token = Set(token.to_string());
        }
        active.attempts = Set(throttle.attempts);
        active.last_attempt = Set(throttle.last_attempt.map(format_ts));
        active.update(&self.conn).await?;

        Ok(())
    }

    /// Compare-and-swap persist of throttle counters, guarded on the
    /// previously observed `last_attempt`. Two concurrent senders both read
    /// the same pre-state; only one wins this update, and the loser treats
    /// the attempt as rate-limited. This is the sqlite-friendly equivalent
    /// of `SELECT ... FOR UPDATE` on the counter row.
    pub async fn update_guarded(
        &self,
        user_id: i32,
        observed_last_attempt: Option<&str>,
        throttle: &ValidationThrottle,
    ) -> Result<bool> {
        let update = email_validations::Entity::update_many()
            .col_expr(
                email_validations::Column::Attempts,
                Expr::value(throttle.attempts),
            )
            .col_expr(
                email_validations::Column::LastAttempt,
                Expr::value(throttle.last_attempt.map(format_ts)),
            )
            .filter(email_validations::Column::UserId.eq(user_id));

        let update = match observed_last_attempt {
            Some(value) => update.filter(email_validations::Column::LastAttempt.eq(value)),
            None => update.filter(email_validations::Column::LastAttempt.is_null()),
        };

        let result = update
            .exec(&self.conn)
            .await
            .context("Failed to update email validation counters")?;

        Ok(result.rows_affected == 1)
    }

    /// Mark the row validated then remove it, in one transaction. The
    /// `is_validated = true` state is only ever visible inside the commit.
    pub async fn complete(&self, user_id: i32, now: DateTime<Utc>) -> Result<()> {
        let txn = self
            .conn
            .begin()
            .await
            .context("Failed to start validation transaction")?;

        let row = email_validations::Entity::find_by_id(user_id)
            .one(&txn)
            .await
            .context("Failed to query email validation for completion")?
            .ok_or_else(|| anyhow::anyhow!("Email validation not found for user {user_id}"))?;

        let mut active: email_validations::ActiveModel = row.into();
        active.is_validated = Set(true);
        active.validated_at = Set(Some(format_ts(now)));
        active.update(&txn).await?;

        email_validations::Entity::delete_by_id(user_id)
            .exec(&txn)
            .await?;

        txn.commit()
            .await
            .context("Failed to commit validation")?;

        Ok(())
    }

    /// Remove every account whose validation row carries `token`, along
    /// with the rows themselves. Used when an undecodable token is
    /// presented: whoever owns it can never validate.
    pub async fn purge_users_by_token(&self, token: &str) -> Result<u64> {
        let rows = email_validations::Entity::find()
            .filter(email_validations::Column::ValidationToken.eq(token))
            .all(&self.conn)
            .await
            .context("Failed to query email validations for purge")?;

        if rows.is_empty() {
            return Ok(0);
        }

        let user_ids: Vec<i32> = rows.iter().map(|r| r.user_id).collect();

        let txn = self
            .conn
            .begin()
            .await
            .context("Failed to start purge transaction")?;

        email_validations::Entity::delete_many()
            .filter(email_validations::Column::UserId.is_in(user_ids.clone()))
            .exec(&txn)
            .await?;

        let deleted = users::Entity::delete_many()
            .filter(users::Column::Id.is_in(user_ids))
            .exec(&txn)
            .await?;

        txn.commit().await.context("Failed to commit purge")?;

        Ok(deleted.rows_affected)
    }
}

/// Throttle view of a stored row.
#[must_use]
pub fn throttle_of(row: &email_validations::Model) -> ValidationThrottle {
    ValidationThrottle {
        attempts: row.attempts,
        last_attempt: row.last_attempt.as_deref().and_then(parse_ts),
    }
}
