use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::decode_enum;

/// Display/sort value stored in `blocked_until` for permanent blocks.
/// Enforcement reads `permanent`, never this timestamp.
#[must_use]
pub fn permanent_block_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub email: String,
    pub ip: Option<String>,
    pub device_uid: Option<String>,
    pub user_id: Option<Uuid>,
    pub success: bool,
    pub risk_score: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BlockedIp {
    pub ip: String,
    pub reason: String,
    pub blocked_until: DateTime<Utc>,
    pub permanent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BlockedIp {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.permanent || self.blocked_until > now
    }
}

impl<'r> FromRow<'r, PgRow> for BlockedIp {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            ip: row.try_get("ip")?,
            reason: row.try_get("reason")?,
            blocked_until: row.try_get("blocked_until")?,
            permanent: row.try_get("permanent")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    #[default]
    Arithmetic,
    Text,
}

impl CaptchaKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arithmetic => "arithmetic",
            Self::Text => "text",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "arithmetic" => Some(Self::Arithmetic),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptchaChallenge {
    pub id: Uuid,
    pub kind: CaptchaKind,
    pub answer_hash: Vec<u8>,
    pub expires_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for CaptchaChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            kind: decode_enum("captcha_challenges.kind", &kind, CaptchaKind::parse)?,
            answer_hash: row.try_get("answer_hash")?,
            expires_at: row.try_get("expires_at")?,
            attempt_count: row.try_get("attempt_count")?,
            used: row.try_get("used")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptchaVerification {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub success: bool,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What the client sees: the prompt, never the answer.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct IssuedCaptcha {
    pub challenge_id: Uuid,
    pub kind: CaptchaKind,
    pub prompt: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HoneypotAccount {
    pub id: Uuid,
    pub email: String,
    pub severity: i16,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for HoneypotAccount {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            severity: row.try_get("severity")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HoneypotActivity {
    pub id: Uuid,
    pub account_id: Uuid,
    pub email: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub severity: i16,
    pub auto_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for HoneypotActivity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            account_id: row.try_get("account_id")?,
            email: row.try_get("email")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            severity: row.try_get("severity")?,
            auto_blocked: row.try_get("auto_blocked")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Pre-credential decision for a login from one IP.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GateDecision {
    Allowed,
    CaptchaRequired,
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Duration};

    #[test]
    fn permanent_flag_wins_over_timestamp() {
        let now = Utc::now();
        let block = BlockedIp {
            ip: "1.2.3.4".to_string(),
            reason: "manual".to_string(),
            blocked_until: now - Duration::days(1),
            permanent: true,
            created_at: now,
            updated_at: now,
        };
        assert!(block.is_active(now + Duration::days(365 * 200)));
    }

    #[test]
    fn sentinel_is_end_of_year_9999() {
        let sentinel = permanent_block_sentinel();
        assert_eq!(sentinel.year(), 9999);
        assert_eq!(sentinel.month(), 12);
        assert_eq!(sentinel.day(), 31);
    }
}
