use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::decode_enum;

/// Client-reported device context attached to a login.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceInfo {
    pub device_uid: Option<String>,
    pub name: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TrustedDevice {
    pub user_id: Uuid,
    pub device_uid: String,
    pub name: Option<String>,
    pub last_ip: Option<String>,
    pub last_user_agent: Option<String>,
    pub last_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for TrustedDevice {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            user_id: row.try_get("user_id")?,
            device_uid: row.try_get("device_uid")?,
            name: row.try_get("name")?,
            last_ip: row.try_get("last_ip")?,
            last_user_agent: row.try_get("last_user_agent")?,
            last_location: row.try_get("last_location")?,
            created_at: row.try_get("created_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertAction {
    Pending,
    Allowed,
    Blocked,
}

impl AlertAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "allowed" => Some(Self::Allowed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmedBy {
    None,
    User,
    Admin,
    Auto,
}

impl ConfirmedBy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::User => "user",
            Self::Admin => "admin",
            Self::Auto => "auto",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(Self::None),
            "user" => Some(Self::User),
            "admin" => Some(Self::Admin),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Raised when a login comes from a device that is not trusted.
/// Terminal once `confirmed_by` is anything but `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UnknownDeviceAlert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_uid: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub location: Option<String>,
    pub risk_score: i32,
    pub action: AlertAction,
    pub confirmed_by: ConfirmedBy,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl UnknownDeviceAlert {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.confirmed_by != ConfirmedBy::None
    }
}

impl<'r> FromRow<'r, PgRow> for UnknownDeviceAlert {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let action: String = row.try_get("action")?;
        let confirmed_by: String = row.try_get("confirmed_by")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            device_uid: row.try_get("device_uid")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            location: row.try_get("location")?,
            risk_score: row.try_get("risk_score")?,
            action: decode_enum("unknown_device_alerts.action", &action, AlertAction::parse)?,
            confirmed_by: decode_enum(
                "unknown_device_alerts.confirmed_by",
                &confirmed_by,
                ConfirmedBy::parse,
            )?,
            created_at: row.try_get("created_at")?,
            confirmed_at: row.try_get("confirmed_at")?,
        })
    }
}

/// A client-reported fingerprint (browser or app characteristics) seen for a user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceFingerprint {
    pub id: Uuid,
    pub user_id: Uuid,
    /// base64url SHA-256 of the fingerprint bound to the user; the raw value is not kept.
    pub fingerprint_hash: String,
    /// Device id most recently reported with this fingerprint.
    pub device_uid: Option<String>,
    pub user_agent: Option<String>,
    pub seen_count: i32,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for DeviceFingerprint {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            fingerprint_hash: row.try_get("fingerprint_hash")?,
            device_uid: row.try_get("device_uid")?,
            user_agent: row.try_get("user_agent")?,
            seen_count: row.try_get("seen_count")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
        })
    }
}

/// Result of registering a fingerprint.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct FingerprintMatch {
    pub fingerprint: DeviceFingerprint,
    /// First time this user presented the fingerprint.
    pub first_seen: bool,
    /// The fingerprint was last reported with a different device id.
    pub device_changed: bool,
}

/// Outcome of checking a login device.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Detection {
    pub unknown: bool,
    pub alert: Option<UnknownDeviceAlert>,
}

impl Detection {
    #[must_use]
    pub fn risk_score(&self) -> Option<i32> {
        self.alert.as_ref().map(|a| a.risk_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_by_none_is_not_terminal() {
        let mut alert = UnknownDeviceAlert {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_uid: "d1".to_string(),
            ip: None,
            user_agent: None,
            location: None,
            risk_score: 30,
            action: AlertAction::Pending,
            confirmed_by: ConfirmedBy::None,
            created_at: Utc::now(),
            confirmed_at: None,
        };
        assert!(!alert.is_terminal());
        alert.confirmed_by = ConfirmedBy::Auto;
        assert!(alert.is_terminal());
        assert_eq!(ConfirmedBy::parse("admin"), Some(ConfirmedBy::Admin));
        assert_eq!(AlertAction::parse("denied"), None);
    }
}
