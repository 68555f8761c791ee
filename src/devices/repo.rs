use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use super::models::{AlertAction, ConfirmedBy, DeviceFingerprint, TrustedDevice, UnknownDeviceAlert};
use crate::store::{db_span, PgStore};

#[async_trait]
pub trait DeviceRepo: Send + Sync {
    async fn find_trusted(&self, user_id: Uuid, device_uid: &str)
        -> Result<Option<TrustedDevice>>;

    /// Unexpired trusted devices, most recently seen first.
    async fn list_trusted(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<TrustedDevice>>;

    /// Insert or refresh a trusted device keyed by `(user_id, device_uid)`.
    /// `created_at` survives a refresh.
    async fn upsert_trusted(&self, device: &TrustedDevice) -> Result<TrustedDevice>;

    async fn touch_trusted(&self, user_id: Uuid, device_uid: &str, now: DateTime<Utc>)
        -> Result<()>;

    async fn remove_trusted(&self, user_id: Uuid, device_uid: &str) -> Result<bool>;

    async fn insert_alert(&self, alert: &UnknownDeviceAlert) -> Result<()>;

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<UnknownDeviceAlert>>;

    /// Most recent alert for the device, pending or resolved.
    async fn find_latest_alert(
        &self,
        user_id: Uuid,
        device_uid: &str,
    ) -> Result<Option<UnknownDeviceAlert>>;

    async fn list_alerts(&self, user_id: Uuid) -> Result<Vec<UnknownDeviceAlert>>;

    /// Resolve a pending alert. Returns `None` if it was already terminal.
    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        action: AlertAction,
        confirmed_by: ConfirmedBy,
        now: DateTime<Utc>,
    ) -> Result<Option<UnknownDeviceAlert>>;

    /// Blocked alerts for the user raised from `ip`, whatever the device.
    async fn count_blocked_alerts(&self, user_id: Uuid, ip: &str) -> Result<i64>;

    async fn find_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint_hash: &str,
    ) -> Result<Option<DeviceFingerprint>>;

    /// Insert keyed by `(user_id, fingerprint_hash)`, or bump `seen_count` and refresh the
    /// last-seen fields. `id` and `first_seen_at` survive a refresh.
    async fn upsert_fingerprint(&self, fingerprint: &DeviceFingerprint)
        -> Result<DeviceFingerprint>;

    /// Most recently seen first.
    async fn list_fingerprints(&self, user_id: Uuid) -> Result<Vec<DeviceFingerprint>>;
}

/// Read access to recent login failures, used as a risk signal.
#[async_trait]
pub trait AttemptHistory: Send + Sync {
    async fn recent_failures(&self, ip: &str, since: DateTime<Utc>) -> Result<i64>;
}

#[async_trait]
impl DeviceRepo for PgStore {
    async fn find_trusted(
        &self,
        user_id: Uuid,
        device_uid: &str,
    ) -> Result<Option<TrustedDevice>> {
        sqlx::query_as::<_, TrustedDevice>(
            "SELECT * FROM trusted_devices WHERE user_id = $1 AND device_uid = $2",
        )
        .bind(user_id)
        .bind(device_uid)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "trusted_devices"))
        .await
        .context("failed to fetch trusted device")
    }

    async fn list_trusted(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<TrustedDevice>> {
        sqlx::query_as::<_, TrustedDevice>(
            r"
            SELECT *
            FROM trusted_devices
            WHERE user_id = $1
              AND expires_at > $2
            ORDER BY last_seen_at DESC
            ",
        )
        .bind(user_id)
        .bind(now)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "trusted_devices"))
        .await
        .context("failed to list trusted devices")
    }

    async fn upsert_trusted(&self, device: &TrustedDevice) -> Result<TrustedDevice> {
        let query = r"
            INSERT INTO trusted_devices
                (user_id, device_uid, name, last_ip, last_user_agent, last_location,
                 created_at, last_seen_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_id, device_uid) DO UPDATE
            SET name = COALESCE(EXCLUDED.name, trusted_devices.name),
                last_ip = EXCLUDED.last_ip,
                last_user_agent = EXCLUDED.last_user_agent,
                last_location = EXCLUDED.last_location,
                last_seen_at = EXCLUDED.last_seen_at,
                expires_at = EXCLUDED.expires_at
            RETURNING *
        ";
        sqlx::query_as::<_, TrustedDevice>(query)
            .bind(device.user_id)
            .bind(&device.device_uid)
            .bind(device.name.as_deref())
            .bind(device.last_ip.as_deref())
            .bind(device.last_user_agent.as_deref())
            .bind(device.last_location.as_deref())
            .bind(device.created_at)
            .bind(device.last_seen_at)
            .bind(device.expires_at)
            .fetch_one(self.pool())
            .instrument(db_span("UPSERT", "trusted_devices"))
            .await
            .context("failed to upsert trusted device")
    }

    async fn touch_trusted(
        &self,
        user_id: Uuid,
        device_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE trusted_devices SET last_seen_at = $3 WHERE user_id = $1 AND device_uid = $2",
        )
        .bind(user_id)
        .bind(device_uid)
        .bind(now)
        .execute(self.pool())
        .instrument(db_span("UPDATE", "trusted_devices"))
        .await
        .context("failed to touch trusted device")?;
        Ok(())
    }

    async fn remove_trusted(&self, user_id: Uuid, device_uid: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM trusted_devices WHERE user_id = $1 AND device_uid = $2")
                .bind(user_id)
                .bind(device_uid)
                .execute(self.pool())
                .instrument(db_span("DELETE", "trusted_devices"))
                .await
                .context("failed to remove trusted device")?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_alert(&self, alert: &UnknownDeviceAlert) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO unknown_device_alerts
                (id, user_id, device_uid, ip, user_agent, location, risk_score,
                 action, confirmed_by, created_at, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(alert.id)
        .bind(alert.user_id)
        .bind(&alert.device_uid)
        .bind(alert.ip.as_deref())
        .bind(alert.user_agent.as_deref())
        .bind(alert.location.as_deref())
        .bind(alert.risk_score)
        .bind(alert.action.as_str())
        .bind(alert.confirmed_by.as_str())
        .bind(alert.created_at)
        .bind(alert.confirmed_at)
        .execute(self.pool())
        .instrument(db_span("INSERT", "unknown_device_alerts"))
        .await
        .context("failed to insert unknown device alert")?;
        Ok(())
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<UnknownDeviceAlert>> {
        sqlx::query_as::<_, UnknownDeviceAlert>("SELECT * FROM unknown_device_alerts WHERE id = $1")
            .bind(alert_id)
            .fetch_optional(self.pool())
            .instrument(db_span("SELECT", "unknown_device_alerts"))
            .await
            .context("failed to fetch unknown device alert")
    }

    async fn find_latest_alert(
        &self,
        user_id: Uuid,
        device_uid: &str,
    ) -> Result<Option<UnknownDeviceAlert>> {
        sqlx::query_as::<_, UnknownDeviceAlert>(
            r"
            SELECT *
            FROM unknown_device_alerts
            WHERE user_id = $1
              AND device_uid = $2
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(user_id)
        .bind(device_uid)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "unknown_device_alerts"))
        .await
        .context("failed to fetch latest alert")
    }

    async fn list_alerts(&self, user_id: Uuid) -> Result<Vec<UnknownDeviceAlert>> {
        sqlx::query_as::<_, UnknownDeviceAlert>(
            "SELECT * FROM unknown_device_alerts WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "unknown_device_alerts"))
        .await
        .context("failed to list unknown device alerts")
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        action: AlertAction,
        confirmed_by: ConfirmedBy,
        now: DateTime<Utc>,
    ) -> Result<Option<UnknownDeviceAlert>> {
        let query = r"
            UPDATE unknown_device_alerts
            SET action = $2, confirmed_by = $3, confirmed_at = $4
            WHERE id = $1
              AND confirmed_by = 'none'
            RETURNING *
        ";
        sqlx::query_as::<_, UnknownDeviceAlert>(query)
            .bind(alert_id)
            .bind(action.as_str())
            .bind(confirmed_by.as_str())
            .bind(now)
            .fetch_optional(self.pool())
            .instrument(db_span("UPDATE", "unknown_device_alerts"))
            .await
            .context("failed to resolve unknown device alert")
    }

    async fn count_blocked_alerts(&self, user_id: Uuid, ip: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*)
            FROM unknown_device_alerts
            WHERE user_id = $1
              AND ip = $2
              AND action = 'blocked'
            ",
        )
        .bind(user_id)
        .bind(ip)
        .fetch_one(self.pool())
        .instrument(db_span("SELECT", "unknown_device_alerts"))
        .await
        .context("failed to count blocked alerts")?;
        Ok(count)
    }

    async fn find_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint_hash: &str,
    ) -> Result<Option<DeviceFingerprint>> {
        sqlx::query_as::<_, DeviceFingerprint>(
            "SELECT * FROM device_fingerprints WHERE user_id = $1 AND fingerprint_hash = $2",
        )
        .bind(user_id)
        .bind(fingerprint_hash)
        .fetch_optional(self.pool())
        .instrument(db_span("SELECT", "device_fingerprints"))
        .await
        .context("failed to fetch device fingerprint")
    }

    async fn upsert_fingerprint(
        &self,
        fingerprint: &DeviceFingerprint,
    ) -> Result<DeviceFingerprint> {
        let query = r"
            INSERT INTO device_fingerprints
                (id, user_id, fingerprint_hash, device_uid, user_agent, seen_count,
                 first_seen_at, last_seen_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $6)
            ON CONFLICT (user_id, fingerprint_hash) DO UPDATE
            SET device_uid = COALESCE(EXCLUDED.device_uid, device_fingerprints.device_uid),
                user_agent = COALESCE(EXCLUDED.user_agent, device_fingerprints.user_agent),
                seen_count = device_fingerprints.seen_count + 1,
                last_seen_at = EXCLUDED.last_seen_at
            RETURNING *
        ";
        sqlx::query_as::<_, DeviceFingerprint>(query)
            .bind(fingerprint.id)
            .bind(fingerprint.user_id)
            .bind(&fingerprint.fingerprint_hash)
            .bind(fingerprint.device_uid.as_deref())
            .bind(fingerprint.user_agent.as_deref())
            .bind(fingerprint.last_seen_at)
            .fetch_one(self.pool())
            .instrument(db_span("UPSERT", "device_fingerprints"))
            .await
            .context("failed to upsert device fingerprint")
    }

    async fn list_fingerprints(&self, user_id: Uuid) -> Result<Vec<DeviceFingerprint>> {
        sqlx::query_as::<_, DeviceFingerprint>(
            r"
            SELECT *
            FROM device_fingerprints
            WHERE user_id = $1
            ORDER BY last_seen_at DESC
            ",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .instrument(db_span("SELECT", "device_fingerprints"))
        .await
        .context("failed to list device fingerprints")
    }
}

#[async_trait]
impl AttemptHistory for PgStore {
    async fn recent_failures(&self, ip: &str, since: DateTime<Utc>) -> Result<i64> {
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
        .context("failed to count recent login failures")?;
        Ok(count)
    }
}
