use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::{utub_members, utubs};
use crate::models::throttle::format_ts;

pub struct UtubRepository {
    conn: DatabaseConnection,
}

impl UtubRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn is_member(&self, utub_id: i32, user_id: i32) -> Result<bool> {
        let row = utub_members::Entity::find()
            .filter(utub_members::Column::UtubId.eq(utub_id))
            .filter(utub_members::Column::UserId.eq(user_id))
            .one(&self.conn)
            .await
            .context("Failed to query UTub membership")?;

        Ok(row.is_some())
    }

    /// Create a UTub with its creator as the first member.
    pub async fn create(
        &self,
        name: &str,
        creator_id: i32,
        now: DateTime<Utc>,
    ) -> Result<utubs::Model> {
        let active = utubs::ActiveModel {
            name: Set(name.to_string()),
            creator_id: Set(creator_id),
            created_at: Set(format_ts(now)),
            ..Default::default()
        };

        let utub = active
            .insert(&self.conn)
            .await
            .context("Failed to insert UTub")?;

        self.add_member(utub.id, creator_id, now).await?;

        Ok(utub)
    }

    pub async fn add_member(&self, utub_id: i32, user_id: i32, now: DateTime<Utc>) -> Result<()> {
        let active = utub_members::ActiveModel {
            utub_id: Set(utub_id),
            user_id: Set(user_id),
            joined_at: Set(format_ts(now)),
        };

        active
            .insert(&self.conn)
            .await
            .context("Failed to insert UTub member")?;

        Ok(())
    }
}
