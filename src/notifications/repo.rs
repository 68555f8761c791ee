use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{NotificationChannel, NotificationEvent, NotificationPreference};
use crate::store::{db_span, PgStore};

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    /// Insert unless `(user_id, event, channel)` already exists. Returns whether a row
    /// was written.
    async fn insert_preference(&self, preference: &NotificationPreference) -> Result<bool>;

    async fn list_preferences(&self, user_id: Uuid) -> Result<Vec<NotificationPreference>>;

    /// Flip `enabled` on a preference owned by `user_id`.
    async fn update_preference(
        &self,
        id: Uuid,
        user_id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationPreference>>;

    async fn find_preference(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        channel: NotificationChannel,
    ) -> Result<Option<NotificationPreference>>;
}

#[async_trait]
impl NotificationRepo for PgStore {
    async fn insert_preference(&self, preference: &NotificationPreference) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO notification_preferences
                (id, user_id, event, channel, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, event, channel) DO NOTHING
            ",
        )
        .bind(preference.id)
        .bind(preference.user_id)
        .bind(preference.event.as_str())
        .bind(preference.channel.as_str())
        .bind(preference.enabled)
        .bind(preference.created_at)
        .bind(preference.updated_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "notification_preferences"))
        .await
        .context("failed to insert notification preference")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_preferences(&self, user_id: Uuid) -> Result<Vec<NotificationPreference>> {
        sqlx::query_as::<_, NotificationPreference>(
            r"
            SELECT *
            FROM notification_preferences
            WHERE user_id = $1
            ORDER BY created_at
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "notification_preferences"))
        .await
        .context("failed to list notification preferences")
    }

    async fn update_preference(
        &self,
        id: Uuid,
        user_id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationPreference>> {
        sqlx::query_as::<_, NotificationPreference>(
            r"
            UPDATE notification_preferences
            SET enabled = $3, updated_at = $4
            WHERE id = $1
              AND user_id = $2
            RETURNING *
            ",
        )
        .bind(id)
        .bind(user_id)
        .bind(enabled)
        .bind(now)
        .fetch_optional(self.pool())
        .instrument(db_span("UPDATE", "notification_preferences"))
        .await
        .context("failed to update notification preference")
    }

    async fn find_preference(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        channel: NotificationChannel,
    ) -> Result<Option<NotificationPreference>> {
        sqlx::query_as::<_, NotificationPreference>(
            r"
            SELECT *
            FROM notification_preferences
            WHERE user_id = $1
              AND event = $2
              AND channel = $3
            ",
        )
        .bind(user_id)
        .bind(event.as_str())
        .bind(channel.as_str())
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "notification_preferences"))
        .await
        .context("failed to fetch notification preference")
    }
}
