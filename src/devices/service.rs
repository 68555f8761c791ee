use base64::Engine;
use chrono::Duration;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    models::{
        AlertAction, ConfirmedBy, Detection, DeviceFingerprint, DeviceInfo, FingerprintMatch,
        TrustedDevice, UnknownDeviceAlert,
    },
    repo::{AttemptHistory, DeviceRepo},
    risk::{RiskScorer, RiskSignals},
};
use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    error::Error,
};

const DEFAULT_TRUST_TTL_DAYS: i64 = 30;
const FAILURE_LOOKBACK_MINUTES: i64 = 60;
const MAX_FINGERPRINT_LEN: usize = 4096;

#[derive(Clone, Debug)]
pub struct DeviceConfig {
    trust_ttl_days: i64,
}

impl DeviceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            trust_ttl_days: DEFAULT_TRUST_TTL_DAYS,
        }
    }

    #[must_use]
    pub fn with_trust_ttl_days(mut self, days: i64) -> Self {
        self.trust_ttl_days = days;
        self
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DeviceService {
    repo: Arc<dyn DeviceRepo>,
    history: Arc<dyn AttemptHistory>,
    scorer: Arc<dyn RiskScorer>,
    config: DeviceConfig,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl DeviceService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn DeviceRepo>,
        history: Arc<dyn AttemptHistory>,
        scorer: Arc<dyn RiskScorer>,
        config: DeviceConfig,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> Self {
        Self {
            repo,
            history,
            scorer,
            config,
            clock,
            audit,
        }
    }

    /// True iff an unexpired trust entry exists. A hit refreshes `last_seen_at`.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn is_trusted(&self, user_id: Uuid, device_uid: &str) -> Result<bool, Error> {
        let now = self.clock.now();
        match self.repo.find_trusted(user_id, device_uid).await? {
            Some(device) if device.expires_at > now => {
                self.repo.touch_trusted(user_id, device_uid, now).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Trust a device for the configured period, renewing an existing entry.
    ///
    /// # Errors
    /// Returns `InvalidRequest` without a device id.
    pub async fn add_trusted(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<TrustedDevice, Error> {
        let device_uid = require_device_uid(device)?;
        let now = self.clock.now();
        let trusted = self
            .repo
            .upsert_trusted(&TrustedDevice {
                user_id,
                device_uid: device_uid.to_string(),
                name: device.name.clone(),
                last_ip: device.ip.clone(),
                last_user_agent: device.user_agent.clone(),
                last_location: device.location.clone(),
                created_at: now,
                last_seen_at: now,
                expires_at: now + Duration::days(self.config.trust_ttl_days),
            })
            .await?;
        self.audit.add_log(
            AuditEvent::DeviceTrusted,
            format!("device {device_uid}"),
            Some(user_id),
        );
        Ok(trusted)
    }

    /// # Errors
    /// Returns `NotFound` if the device was not trusted.
    pub async fn remove_trusted(&self, user_id: Uuid, device_uid: &str) -> Result<(), Error> {
        if !self.repo.remove_trusted(user_id, device_uid).await? {
            return Err(Error::NotFound);
        }
        self.audit.add_log(
            AuditEvent::DeviceRemoved,
            format!("device {device_uid}"),
            Some(user_id),
        );
        Ok(())
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_trusted(&self, user_id: Uuid) -> Result<Vec<TrustedDevice>, Error> {
        Ok(self.repo.list_trusted(user_id, self.clock.now()).await?)
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_alerts(&self, user_id: Uuid) -> Result<Vec<UnknownDeviceAlert>, Error> {
        Ok(self.repo.list_alerts(user_id).await?)
    }

    /// Register a client fingerprint for the user.
    ///
    /// `device_changed` is set when the same fingerprint was last reported with another
    /// device id, which usually means the device id was reset or forged.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for a blank or oversized fingerprint.
    pub async fn record_fingerprint(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
        fingerprint: &str,
    ) -> Result<FingerprintMatch, Error> {
        let fingerprint_hash = fingerprint_hash(user_id, fingerprint)?;
        let previous = self.repo.find_fingerprint(user_id, &fingerprint_hash).await?;

        let device_uid = device
            .device_uid
            .as_deref()
            .map(str::trim)
            .filter(|uid| !uid.is_empty());
        let now = self.clock.now();
        let stored = self
            .repo
            .upsert_fingerprint(&DeviceFingerprint {
                id: Uuid::now_v7(),
                user_id,
                fingerprint_hash,
                device_uid: device_uid.map(str::to_string),
                user_agent: device.user_agent.clone(),
                seen_count: 1,
                first_seen_at: now,
                last_seen_at: now,
            })
            .await?;

        let device_changed = match (
            previous.as_ref().and_then(|p| p.device_uid.as_deref()),
            device_uid,
        ) {
            (Some(before), Some(current)) => before != current,
            _ => false,
        };
        if device_changed {
            warn!("Fingerprint {} for user {user_id} moved to another device id", stored.id);
            self.audit.add_log(
                AuditEvent::DeviceFingerprintChanged,
                format!(
                    "fingerprint {} device {} ip={}",
                    stored.id,
                    device_uid.unwrap_or("-"),
                    device.ip.as_deref().unwrap_or("-")
                ),
                Some(user_id),
            );
        }

        Ok(FingerprintMatch {
            fingerprint: stored,
            first_seen: previous.is_none(),
            device_changed,
        })
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_fingerprints(&self, user_id: Uuid) -> Result<Vec<DeviceFingerprint>, Error> {
        Ok(self.repo.list_fingerprints(user_id).await?)
    }

    /// Check a login device. An untrusted device raises a pending alert unless the
    /// device already has one. A device whose alert was resolved stays unknown but raises
    /// nothing new; the resolved alert is returned instead.
    ///
    /// # Errors
    /// Returns `InvalidRequest` without a device id.
    pub async fn detect_unknown(
        &self,
        user_id: Uuid,
        device: &DeviceInfo,
    ) -> Result<Detection, Error> {
        let device_uid = require_device_uid(device)?;

        if self.is_trusted(user_id, device_uid).await? {
            return Ok(Detection {
                unknown: false,
                alert: None,
            });
        }

        if let Some(alert) = self.repo.find_latest_alert(user_id, device_uid).await? {
            if alert.is_terminal() {
                debug!(
                    "Device {device_uid} was already reviewed in alert {} ({:?})",
                    alert.id, alert.action
                );
            } else {
                debug!("Reusing pending alert {} for device {device_uid}", alert.id);
            }
            return Ok(Detection {
                unknown: true,
                alert: Some(alert),
            });
        }

        let now = self.clock.now();
        let trusted = self.repo.list_trusted(user_id, now).await?;
        let previously_blocked = match device.ip.as_deref() {
            Some(ip) => self.repo.count_blocked_alerts(user_id, ip).await?,
            None => 0,
        };
        let recent_failures = match device.ip.as_deref() {
            Some(ip) => self
                .history
                .recent_failures(ip, now - Duration::minutes(FAILURE_LOOKBACK_MINUTES))
                .await
                .unwrap_or_else(|err| {
                    warn!("Failed to read login history for risk scoring: {err:#}");
                    0
                }),
            None => 0,
        };

        let risk_score = self.scorer.score(&RiskSignals {
            ip: device.ip.as_deref(),
            location: device.location.as_deref(),
            trusted: &trusted,
            previously_blocked,
            recent_failures,
        });

        let alert = UnknownDeviceAlert {
            id: Uuid::now_v7(),
            user_id,
            device_uid: device_uid.to_string(),
            ip: device.ip.clone(),
            user_agent: device.user_agent.clone(),
            location: device.location.clone(),
            risk_score,
            action: AlertAction::Pending,
            confirmed_by: ConfirmedBy::None,
            created_at: now,
            confirmed_at: None,
        };
        self.repo.insert_alert(&alert).await?;

        info!(
            "Unknown device {device_uid} for user {user_id} (risk {risk_score})"
        );
        self.audit.add_log(
            AuditEvent::UnknownDevice,
            format!(
                "device {device_uid} ip={} risk={risk_score}",
                device.ip.as_deref().unwrap_or("-")
            ),
            Some(user_id),
        );

        Ok(Detection {
            unknown: true,
            alert: Some(alert),
        })
    }

    /// Resolve an alert. Already-resolved alerts are returned unchanged.
    ///
    /// # Errors
    /// Returns `NotFound` for alerts the user does not own and `InvalidRequest` when
    /// `confirmed_by` is `None`.
    pub async fn confirm_device(
        &self,
        alert_id: Uuid,
        user_id: Uuid,
        is_trusted: bool,
        confirmed_by: ConfirmedBy,
    ) -> Result<UnknownDeviceAlert, Error> {
        if confirmed_by == ConfirmedBy::None {
            return Err(Error::InvalidRequest(
                "confirmed_by must not be none".to_string(),
            ));
        }

        let Some(alert) = self
            .repo
            .find_alert(alert_id)
            .await?
            .filter(|a| a.user_id == user_id)
        else {
            return Err(Error::NotFound);
        };

        if alert.is_terminal() {
            return Ok(alert);
        }

        let action = if is_trusted {
            AlertAction::Allowed
        } else {
            AlertAction::Blocked
        };
        let Some(resolved) = self
            .repo
            .resolve_alert(alert_id, action, confirmed_by, self.clock.now())
            .await?
        else {
            // Resolved concurrently; report whatever won.
            return self.repo.find_alert(alert_id).await?.ok_or(Error::NotFound);
        };

        if is_trusted {
            self.add_trusted(
                user_id,
                &DeviceInfo {
                    device_uid: Some(resolved.device_uid.clone()),
                    name: None,
                    ip: resolved.ip.clone(),
                    user_agent: resolved.user_agent.clone(),
                    location: resolved.location.clone(),
                },
            )
            .await?;
        }

        self.audit.add_log(
            AuditEvent::DeviceConfirmed,
            format!(
                "alert {alert_id} action={} by={}",
                resolved.action.as_str(),
                resolved.confirmed_by.as_str()
            ),
            Some(user_id),
        );
        Ok(resolved)
    }
}

fn fingerprint_hash(user_id: Uuid, fingerprint: &str) -> Result<String, Error> {
    let fingerprint = fingerprint.trim();
    if fingerprint.is_empty() {
        return Err(Error::InvalidRequest("fingerprint is required".to_string()));
    }
    if fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err(Error::InvalidRequest("fingerprint is too long".to_string()));
    }
    let mut hasher = Sha256::new();
    hasher.update(format!("device-fingerprint:v1|{user_id}|{fingerprint}").as_bytes());
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(hasher.finalize()))
}

fn require_device_uid(device: &DeviceInfo) -> Result<&str, Error> {
    device
        .device_uid
        .as_deref()
        .map(str::trim)
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| Error::InvalidRequest("device_uid is required".to_string()))
}
