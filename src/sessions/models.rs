use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::decode_enum;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

/// Unit of revocation: one per logical session/device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenGroup {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TokenGroup {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            device_uid: row.try_get("device_uid")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// Stored token. Only the hash and the sealed value are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub id: Uuid,
    pub group_id: Uuid,
    pub kind: TokenKind,
    pub token_hash: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Token {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        Ok(Self {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            kind: decode_enum("tokens.kind", &kind, TokenKind::parse)?,
            token_hash: row.try_get("token_hash")?,
            ciphertext: row.try_get("ciphertext")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// One row per session. `logout_at = None` means the session is active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Activity {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub login_at: DateTime<Utc>,
    pub logout_at: Option<DateTime<Utc>>,
    pub device_uid: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub token_group_id: Option<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for Activity {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            login_at: row.try_get("login_at")?,
            logout_at: row.try_get("logout_at")?,
            device_uid: row.try_get("device_uid")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            token_group_id: row.try_get("token_group_id")?,
        })
    }
}

/// Who the session is issued to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    pub user_id: Uuid,
    pub email: String,
}

/// Tokens handed to the client exactly once.
#[derive(Clone, Debug)]
pub struct IssuedSession {
    pub group: TokenGroup,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub activity: Activity,
}
