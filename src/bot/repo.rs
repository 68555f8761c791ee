use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{
    BlockedIp, CaptchaChallenge, CaptchaVerification, HoneypotAccount, HoneypotActivity,
    LoginAttempt,
};
use crate::store::{db_span, PgStore};

#[async_trait]
pub trait BotRepo: Send + Sync {
    async fn insert_attempt(&self, attempt: &LoginAttempt) -> Result<()>;

    async fn count_failures_since(&self, ip: &str, since: DateTime<Utc>) -> Result<i64>;

    async fn find_block(&self, ip: &str) -> Result<Option<BlockedIp>>;

    /// Create or overwrite the block for `block.ip`. `created_at` survives an overwrite.
    async fn upsert_block(&self, block: &BlockedIp) -> Result<BlockedIp>;

    async fn delete_block(&self, ip: &str) -> Result<bool>;

    /// Blocks still in force at `now`, most recently updated first.
    async fn list_blocks(&self, now: DateTime<Utc>) -> Result<Vec<BlockedIp>>;

    async fn insert_captcha(&self, challenge: &CaptchaChallenge) -> Result<()>;

    async fn find_captcha(&self, challenge_id: Uuid) -> Result<Option<CaptchaChallenge>>;

    /// Bump `attempt_count` and return the new value, or `None` for an unknown id.
    async fn increment_captcha_attempts(&self, challenge_id: Uuid) -> Result<Option<i32>>;

    /// Flip `used`. Returns `false` if it was already set.
    async fn mark_captcha_used(&self, challenge_id: Uuid) -> Result<bool>;

    async fn insert_captcha_verification(&self, verification: &CaptchaVerification) -> Result<()>;

    async fn find_honeypot(&self, email: &str) -> Result<Option<HoneypotAccount>>;

    async fn upsert_honeypot(&self, account: &HoneypotAccount) -> Result<HoneypotAccount>;

    async fn insert_honeypot_activity(&self, activity: &HoneypotActivity) -> Result<()>;

    async fn list_honeypot_activity(&self, limit: i64) -> Result<Vec<HoneypotActivity>>;
}

#[async_trait]
impl BotRepo for PgStore {
    async fn insert_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO login_attempts
                (id, email, ip, device_uid, user_id, success, risk_score, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(attempt.id)
        .bind(&attempt.email)
        .bind(attempt.ip.as_deref())
        .bind(attempt.device_uid.as_deref())
        .bind(attempt.user_id)
        .bind(attempt.success)
        .bind(attempt.risk_score)
        .bind(attempt.created_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "login_attempts"))
        .await
        .context("failed to insert login attempt")?;
        Ok(())
    }

    async fn count_failures_since(&self, ip: &str, since: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM login_attempts
            WHERE ip = $1
              AND success = FALSE
              AND created_at >= $2
            ",
        )
        .bind(ip)
        .bind(since)
        .fetch_one(self.pool())
        .instrument(db_span("SELECT", "login_attempts"))
        .await
        .context("failed to count login failures")?;
        Ok(count)
    }

    async fn find_block(&self, ip: &str) -> Result<Option<BlockedIp>> {
        sqlx::query_as::<_, BlockedIp>("SELECT * FROM blocked_ips WHERE ip = $1")
            .bind(ip)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "blocked_ips"))
            .await
            .context("failed to fetch blocked ip")
    }

    async fn upsert_block(&self, block: &BlockedIp) -> Result<BlockedIp> {
        let query = r"
            INSERT INTO blocked_ips (ip, reason, blocked_until, permanent, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (ip) DO UPDATE
            SET reason = EXCLUDED.reason,
                blocked_until = EXCLUDED.blocked_until,
                permanent = EXCLUDED.permanent,
                updated_at = EXCLUDED.updated_at
            RETURNING *
        ";
        sqlx::query_as::<_, BlockedIp>(query)
            .bind(&block.ip)
            .bind(&block.reason)
            .bind(block.blocked_until)
            .bind(block.permanent)
            .bind(block.created_at)
            .bind(block.updated_at)
            .fetch_one(self.pool())
            .instrument(db_span("UPSERT", "blocked_ips"))
            .await
            .context("failed to upsert blocked ip")
    }

    async fn delete_block(&self, ip: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blocked_ips WHERE ip = $1")
            .bind(ip)
            .execute(self.pool())
            .instrument(db_span("DELETE", "blocked_ips"))
            .await
            .context("failed to delete blocked ip")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_blocks(&self, now: DateTime<Utc>) -> Result<Vec<BlockedIp>> {
        sqlx::query_as::<_, BlockedIp>(
            r"
            SELECT *
            FROM blocked_ips
            WHERE permanent = TRUE
               OR blocked_until > $1
            ORDER BY updated_at DESC
            ",
        )
        .bind(now)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "blocked_ips"))
        .await
        .context("failed to list blocked ips")
    }

    async fn insert_captcha(&self, challenge: &CaptchaChallenge) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO captcha_challenges
                (id, kind, answer_hash, expires_at, attempt_count, used, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(challenge.id)
        .bind(challenge.kind.as_str())
        .bind(&challenge.answer_hash)
        .bind(challenge.expires_at)
        .bind(challenge.attempt_count)
        .bind(challenge.used)
        .bind(challenge.created_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "captcha_challenges"))
        .await
        .context("failed to insert captcha challenge")?;
        Ok(())
    }

    async fn find_captcha(&self, challenge_id: Uuid) -> Result<Option<CaptchaChallenge>> {
        sqlx::query_as::<_, CaptchaChallenge>("SELECT * FROM captcha_challenges WHERE id = $1")
            .bind(challenge_id)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "captcha_challenges"))
            .await
            .context("failed to fetch captcha challenge")
    }

    async fn increment_captcha_attempts(&self, challenge_id: Uuid) -> Result<Option<i32>> {
        let row: Option<(i32,)> = sqlx::query_as(
            r"
            UPDATE captcha_challenges
            SET attempt_count = attempt_count + 1
            WHERE id = $1
            RETURNING attempt_count
            ",
        )
        .bind(challenge_id)
        .fetch_optional(self.pool())
        .instrument(db_span("UPDATE", "captcha_challenges"))
        .await
        .context("failed to increment captcha attempts")?;
        Ok(row.map(|(count,)| count))
    }

    async fn mark_captcha_used(&self, challenge_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE captcha_challenges SET used = TRUE WHERE id = $1 AND used = FALSE",
        )
        .bind(challenge_id)
        .execute(self.pool())
        .instrument(db_span("UPDATE", "captcha_challenges"))
        .await
        .context("failed to mark captcha used")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_captcha_verification(&self, verification: &CaptchaVerification) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO captcha_verifications (id, challenge_id, success, ip, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(verification.id)
        .bind(verification.challenge_id)
        .bind(verification.success)
        .bind(verification.ip.as_deref())
        .bind(verification.created_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "captcha_verifications"))
        .await
        .context("failed to insert captcha verification")?;
        Ok(())
    }

    async fn find_honeypot(&self, email: &str) -> Result<Option<HoneypotAccount>> {
        sqlx::query_as::<_, HoneypotAccount>(
            "SELECT * FROM honeypot_accounts WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "honeypot_accounts"))
        .await
        .context("failed to fetch honeypot account")
    }

    async fn upsert_honeypot(&self, account: &HoneypotAccount) -> Result<HoneypotAccount> {
        let query = r"
            INSERT INTO honeypot_accounts (id, email, severity, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET severity = EXCLUDED.severity
            RETURNING *
        ";
        sqlx::query_as::<_, HoneypotAccount>(query)
            .bind(account.id)
            .bind(&account.email)
            .bind(account.severity)
            .bind(account.created_at)
            .fetch_one(self.pool())
            .instrument(db_span("UPSERT", "honeypot_accounts"))
            .await
            .context("failed to upsert honeypot account")
    }

    async fn insert_honeypot_activity(&self, activity: &HoneypotActivity) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO honeypot_activity
                (id, account_id, email, ip, user_agent, severity, auto_blocked, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(activity.id)
        .bind(activity.account_id)
        .bind(&activity.email)
        .bind(activity.ip.as_deref())
        .bind(activity.user_agent.as_deref())
        .bind(activity.severity)
        .bind(activity.auto_blocked)
        .bind(activity.created_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "honeypot_activity"))
        .await
        .context("failed to insert honeypot activity")?;
        Ok(())
    }

    async fn list_honeypot_activity(&self, limit: i64) -> Result<Vec<HoneypotActivity>> {
        sqlx::query_as::<_, HoneypotActivity>(
            "SELECT * FROM honeypot_activity ORDER BY created_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "honeypot_activity"))
        .await
        .context("failed to list honeypot activity")
    }
}
