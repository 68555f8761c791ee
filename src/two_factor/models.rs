use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::decode_enum;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TwoFactorStateKind {
    Disabled,
    Pending,
    Enabled,
}

impl TwoFactorStateKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Pending => "pending",
            Self::Enabled => "enabled",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "disabled" => Some(Self::Disabled),
            "pending" => Some(Self::Pending),
            "enabled" => Some(Self::Enabled),
            _ => None,
        }
    }
}

/// Per-user 2FA state. A missing row means `Disabled`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwoFactorState {
    pub user_id: Uuid,
    pub state: TwoFactorStateKind,
    pub secret_ciphertext: Option<Vec<u8>>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TwoFactorState {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let state: String = row.try_get("state")?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            state: decode_enum("two_factor_states.state", &state, TwoFactorStateKind::parse)?,
            secret_ciphertext: row.try_get("secret_ciphertext")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecoveryCode {
    pub id: Uuid,
    pub user_id: Uuid,
    pub position: i32,
    pub code_hash: String,
    pub used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for RecoveryCode {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            position: row.try_get("position")?,
            code_hash: row.try_get("code_hash")?,
            used_at: row.try_get("used_at")?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    Pending,
    Verified,
    Failed,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A second-factor prompt raised during login. The id alone identifies the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwoFactorChallenge {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub status: ChallengeStatus,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for TwoFactorChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            status: decode_enum("two_factor_challenges.status", &status, ChallengeStatus::parse)?,
            attempts: row.try_get("attempts")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

/// Returned once by setup so the client can enroll an authenticator.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SecretSetup {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct TwoFactorStatus {
    pub state: TwoFactorStateKind,
    pub recovery_codes_remaining: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeMethod {
    Totp,
    RecoveryCode,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CompletedChallenge {
    pub user_id: Uuid,
    pub method: ChallengeMethod,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_and_status_parse_their_own_names() {
        for state in [
            TwoFactorStateKind::Disabled,
            TwoFactorStateKind::Pending,
            TwoFactorStateKind::Enabled,
        ] {
            assert_eq!(TwoFactorStateKind::parse(state.as_str()), Some(state));
        }
        for status in [
            ChallengeStatus::Pending,
            ChallengeStatus::Verified,
            ChallengeStatus::Failed,
        ] {
            assert_eq!(ChallengeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ChallengeStatus::parse("expired"), None);
    }
}
