use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{Activity, Token, TokenGroup};
use crate::store::{db_span, PgStore};

#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Persist a group, its tokens and the activity row atomically.
    async fn insert_session(
        &self,
        group: &TokenGroup,
        tokens: &[Token],
        activity: &Activity,
    ) -> Result<()>;

    /// Delete a group and its tokens, closing the activities that reference it.
    /// Returns `false` when the group does not exist.
    async fn revoke_group(&self, group_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    /// Close an active session owned by `user_id` and revoke its group.
    /// Returns `false` when no such active session exists.
    async fn deactivate(&self, session_id: Uuid, user_id: Uuid, now: DateTime<Utc>)
        -> Result<bool>;

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Activity>>;

    async fn find_group(&self, group_id: Uuid) -> Result<Option<TokenGroup>>;

    async fn list_tokens(&self, group_id: Uuid) -> Result<Vec<Token>>;

    async fn find_token_by_hash(&self, token_hash: &[u8]) -> Result<Option<Token>>;

    async fn find_activity(&self, session_id: Uuid) -> Result<Option<Activity>>;
}

async fn revoke_group_tx(
    tx: &mut sqlx::PgConnection,
    group_id: Uuid,
    now: DateTime<Utc>,
) -> Result<bool> {
    // Tokens first: nothing may keep referencing a deleted group.
    sqlx::query("DELETE FROM tokens WHERE group_id = $1")
        .bind(group_id)
        .execute(&mut *tx)
        .instrument(db_span("DELETE", "tokens"))
        .await
        .context("failed to delete tokens")?;

    let deleted = sqlx::query("DELETE FROM token_groups WHERE id = $1")
        .bind(group_id)
        .execute(&mut *tx)
        .instrument(db_span("DELETE", "token_groups"))
        .await
        .context("failed to delete token group")?;

    sqlx::query(
        r"
        UPDATE activities
        SET logout_at = $2
        WHERE token_group_id = $1
          AND logout_at IS NULL
        ",
    )
    .bind(group_id)
    .bind(now)
    .execute(&mut *tx)
    .instrument(db_span("UPDATE", "activities"))
    .await
    .context("failed to close activities")?;

    Ok(deleted.rows_affected() > 0)
}

#[async_trait]
impl SessionRepo for PgStore {
    async fn insert_session(
        &self,
        group: &TokenGroup,
        tokens: &[Token],
        activity: &Activity,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r"
            INSERT INTO token_groups (id, user_id, device_uid, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(group.id)
        .bind(group.user_id)
        .bind(group.device_uid.as_deref())
        .bind(group.created_at)
        .bind(group.expires_at)
        .execute(&mut *tx)
        .instrument(db_span("INSERT", "token_groups"))
        .await
        .context("failed to insert token group")?;

        for token in tokens {
            sqlx::query(
                r"
                INSERT INTO tokens (id, group_id, kind, token_hash, ciphertext, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(token.id)
            .bind(token.group_id)
            .bind(token.kind.as_str())
            .bind(&token.token_hash)
            .bind(&token.ciphertext)
            .bind(token.created_at)
            .bind(token.expires_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", "tokens"))
            .await
            .context("failed to insert token")?;
        }

        sqlx::query(
            r"
            INSERT INTO activities
                (session_id, user_id, login_at, logout_at, device_uid, ip, user_agent, token_group_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(activity.session_id)
        .bind(activity.user_id)
        .bind(activity.login_at)
        .bind(activity.logout_at)
        .bind(activity.device_uid.as_deref())
        .bind(activity.ip.as_deref())
        .bind(activity.user_agent.as_deref())
        .bind(activity.token_group_id)
        .execute(&mut *tx)
        .instrument(db_span("INSERT", "activities"))
        .await
        .context("failed to insert activity")?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_group(&self, group_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let revoked = revoke_group_tx(&mut tx, group_id, now).await?;
        tx.commit().await?;
        Ok(revoked)
    }

    async fn deactivate(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let row: Option<(Option<Uuid>,)> = sqlx::query_as(
            r"
            SELECT token_group_id
            FROM activities
            WHERE session_id = $1
              AND user_id = $2
              AND logout_at IS NULL
            FOR UPDATE
            ",
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .instrument(db_span("SELECT", "activities"))
        .await
        .context("failed to lock activity")?;

        let Some((group_id,)) = row else {
            return Ok(false);
        };

        if let Some(group_id) = group_id {
            revoke_group_tx(&mut tx, group_id, now).await?;
        }

        sqlx::query("UPDATE activities SET logout_at = $2 WHERE session_id = $1 AND logout_at IS NULL")
            .bind(session_id)
            .bind(now)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", "activities"))
            .await
            .context("failed to close activity")?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Activity>> {
        sqlx::query_as::<_, Activity>(
            r"
            SELECT a.session_id, a.user_id, a.login_at, a.logout_at, a.device_uid,
                   a.ip, a.user_agent, a.token_group_id
            FROM activities a
            JOIN token_groups g ON g.id = a.token_group_id
            WHERE a.user_id = $1
              AND a.logout_at IS NULL
              AND g.expires_at > $2
            ORDER BY a.login_at DESC
            ",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "activities"))
        .await
        .context("failed to list active sessions")
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<TokenGroup>> {
        sqlx::query_as::<_, TokenGroup>("SELECT * FROM token_groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "token_groups"))
            .await
            .context("failed to fetch token group")
    }

    async fn list_tokens(&self, group_id: Uuid) -> Result<Vec<Token>> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE group_id = $1 ORDER BY created_at")
            .bind(group_id)
            .fetch_all(self.pool())
            .instrument(db_span("SELECT", "tokens"))
            .await
            .context("failed to list tokens")
    }

    async fn find_token_by_hash(&self, token_hash: &[u8]) -> Result<Option<Token>> {
        sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "tokens"))
            .await
            .context("failed to fetch token")
    }

    async fn find_activity(&self, session_id: Uuid) -> Result<Option<Activity>> {
        sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "activities"))
            .await
            .context("failed to fetch activity")
    }
}
