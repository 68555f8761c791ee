use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, Row};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::decode_enum;

/// Security events a user can be told about.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    NewLogin,
    UnknownDevice,
    TwoFactorChanged,
    IpBlocked,
}

impl NotificationEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NewLogin => "new_login",
            Self::UnknownDevice => "unknown_device",
            Self::TwoFactorChanged => "two_factor_changed",
            Self::IpBlocked => "ip_blocked",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new_login" => Some(Self::NewLogin),
            "unknown_device" => Some(Self::UnknownDevice),
            "two_factor_changed" => Some(Self::TwoFactorChanged),
            "ip_blocked" => Some(Self::IpBlocked),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Sms,
    Push,
}

impl NotificationChannel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "email" => Some(Self::Email),
            "sms" => Some(Self::Sms),
            "push" => Some(Self::Push),
            _ => None,
        }
    }
}

/// One `(event, channel)` switch. Unique per user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NotificationPreference {
    pub id: Uuid,
    pub user_id: Uuid,
    pub event: NotificationEvent,
    pub channel: NotificationChannel,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for NotificationPreference {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let event: String = row.try_get("event")?;
        let channel: String = row.try_get("channel")?;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            event: decode_enum(
                "notification_preferences.event",
                &event,
                NotificationEvent::parse,
            )?,
            channel: decode_enum(
                "notification_preferences.channel",
                &channel,
                NotificationChannel::parse,
            )?,
            enabled: row.try_get("enabled")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct NewPreference {
    pub event: NotificationEvent,
    pub channel: NotificationChannel,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, ToSchema)]
pub struct PreferenceUpdate {
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_columns() {
        for event in [
            NotificationEvent::NewLogin,
            NotificationEvent::UnknownDevice,
            NotificationEvent::TwoFactorChanged,
            NotificationEvent::IpBlocked,
        ] {
            assert_eq!(NotificationEvent::parse(event.as_str()), Some(event));
            assert_eq!(
                serde_json::to_string(&event).unwrap(),
                format!("\"{}\"", event.as_str())
            );
        }
        assert_eq!(NotificationChannel::parse("pager"), None);
    }

    #[test]
    fn new_preference_defaults_to_enabled() {
        let parsed: NewPreference =
            serde_json::from_str(r#"{"event":"unknown_device","channel":"push"}"#).unwrap();
        assert!(parsed.enabled);
        assert_eq!(parsed.channel, NotificationChannel::Push);
    }
}
