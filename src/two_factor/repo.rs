use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{RecoveryCode, TwoFactorChallenge, TwoFactorState};
use crate::store::{db_span, PgStore};

#[async_trait]
pub trait TwoFactorRepo: Send + Sync {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<TwoFactorState>>;

    /// Store a pending secret. Returns `false` if 2FA is already enabled.
    async fn save_pending(
        &self,
        user_id: Uuid,
        secret_ciphertext: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Promote a pending setup and replace the recovery codes in one transaction.
    /// Returns `false` if the user has no pending setup.
    async fn enable(&self, user_id: Uuid, codes: &[RecoveryCode], now: DateTime<Utc>)
        -> Result<bool>;

    /// Drop the state row, recovery codes and outstanding challenges.
    /// Returns `false` if there was nothing to remove.
    async fn disable(&self, user_id: Uuid) -> Result<bool>;

    async fn list_unused_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCode>>;

    /// Mark a code used. Returns `false` if another caller got there first.
    async fn consume_recovery_code(&self, code_id: Uuid, now: DateTime<Utc>) -> Result<bool>;

    async fn insert_challenge(&self, challenge: &TwoFactorChallenge) -> Result<()>;

    async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<TwoFactorChallenge>>;

    /// Count a wrong code, failing the challenge once `max_attempts` is reached.
    /// Returns the updated challenge, or `None` if it was no longer pending.
    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TwoFactorChallenge>>;

    /// Flip a pending challenge to verified. Returns `false` if it was not pending.
    async fn complete_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<bool>;
}

#[async_trait]
impl TwoFactorRepo for PgStore {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<TwoFactorState>> {
        sqlx::query_as::<_, TwoFactorState>(
            "SELECT user_id, state, secret_ciphertext, updated_at FROM two_factor_states WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "two_factor_states"))
        .await
        .context("failed to load two-factor state")
    }

    async fn save_pending(
        &self,
        user_id: Uuid,
        secret_ciphertext: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let query = r"
            INSERT INTO two_factor_states (user_id, state, secret_ciphertext, updated_at)
            VALUES ($1, 'pending', $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET state = 'pending',
                secret_ciphertext = EXCLUDED.secret_ciphertext,
                updated_at = EXCLUDED.updated_at
            WHERE two_factor_states.state <> 'enabled'
        ";
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(secret_ciphertext)
            .bind(now)
            .execute(self.pool())
            .instrument(db_span("UPSERT", "two_factor_states"))
            .await
            .context("failed to save pending two-factor secret")?;
        Ok(result.rows_affected() > 0)
    }

    async fn enable(
        &self,
        user_id: Uuid,
        codes: &[RecoveryCode],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        let updated = sqlx::query(
            r"
            UPDATE two_factor_states
            SET state = 'enabled', updated_at = $2
            WHERE user_id = $1
              AND state = 'pending'
            ",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *tx)
        .instrument(db_span("UPDATE", "two_factor_states"))
        .await
        .context("failed to enable two-factor state")?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", "recovery_codes"))
            .await
            .context("failed to clear recovery codes")?;

        for code in codes {
            sqlx::query(
                r"
                INSERT INTO recovery_codes (id, user_id, position, code_hash, used_at)
                VALUES ($1, $2, $3, $4, $5)
                ",
            )
            .bind(code.id)
            .bind(code.user_id)
            .bind(code.position)
            .bind(&code.code_hash)
            .bind(code.used_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", "recovery_codes"))
            .await
            .context("failed to insert recovery code")?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn disable(&self, user_id: Uuid) -> Result<bool> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM recovery_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", "recovery_codes"))
            .await
            .context("failed to delete recovery codes")?;

        sqlx::query("DELETE FROM two_factor_challenges WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", "two_factor_challenges"))
            .await
            .context("failed to delete two-factor challenges")?;

        let deleted = sqlx::query("DELETE FROM two_factor_states WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", "two_factor_states"))
            .await
            .context("failed to delete two-factor state")?;

        tx.commit().await?;
        Ok(deleted.rows_affected() > 0)
    }

    async fn list_unused_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCode>> {
        sqlx::query_as::<_, RecoveryCode>(
            r"
            SELECT id, user_id, position, code_hash, used_at
            FROM recovery_codes
            WHERE user_id = $1
              AND used_at IS NULL
            ORDER BY position
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "recovery_codes"))
        .await
        .context("failed to list recovery codes")
    }

    async fn consume_recovery_code(&self, code_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE recovery_codes SET used_at = $2 WHERE id = $1 AND used_at IS NULL",
        )
        .bind(code_id)
        .bind(now)
        .execute(self.pool())
        .instrument(db_span("UPDATE", "recovery_codes"))
        .await
        .context("failed to consume recovery code")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_challenge(&self, challenge: &TwoFactorChallenge) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO two_factor_challenges
                (id, user_id, ip, user_agent, status, attempts, created_at, expires_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(challenge.id)
        .bind(challenge.user_id)
        .bind(challenge.ip.as_deref())
        .bind(challenge.user_agent.as_deref())
        .bind(challenge.status.as_str())
        .bind(challenge.attempts)
        .bind(challenge.created_at)
        .bind(challenge.expires_at)
        .bind(challenge.completed_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "two_factor_challenges"))
        .await
        .context("failed to insert two-factor challenge")?;
        Ok(())
    }

    async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<TwoFactorChallenge>> {
        sqlx::query_as::<_, TwoFactorChallenge>(
            "SELECT * FROM two_factor_challenges WHERE id = $1",
        )
        .bind(challenge_id)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "two_factor_challenges"))
        .await
        .context("failed to fetch two-factor challenge")
    }

    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TwoFactorChallenge>> {
        let query = r"
            UPDATE two_factor_challenges
            SET attempts = attempts + 1,
                status = CASE WHEN attempts + 1 >= $2 THEN 'failed' ELSE status END,
                completed_at = CASE WHEN attempts + 1 >= $2 THEN $3 ELSE completed_at END
            WHERE id = $1
              AND status = 'pending'
            RETURNING *
        ";
        sqlx::query_as::<_, TwoFactorChallenge>(query)
            .bind(challenge_id)
            .bind(max_attempts)
            .bind(now)
            .fetch_optional(self.pool())
            .instrument(db_span("UPDATE", "two_factor_challenges"))
            .await
            .context("failed to record failed two-factor attempt")
    }

    async fn complete_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE two_factor_challenges
            SET status = 'verified', completed_at = $2
            WHERE id = $1
              AND status = 'pending'
            ",
        )
        .bind(challenge_id)
        .bind(now)
        .execute(self.pool())
        .instrument(db_span("UPDATE", "two_factor_challenges"))
        .await
        .context("failed to complete two-factor challenge")?;
        Ok(result.rows_affected() > 0)
    }
}
