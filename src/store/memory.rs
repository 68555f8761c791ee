//! In-process store implementing every repository trait.
//!
//! All state sits behind one mutex, so each trait method is atomic the same way a
//! single SQL statement or transaction is in [`super::PgStore`].

use anyhow::{anyhow, Result};
use argon2::{password_hash::SaltString, Argon2, PasswordHasher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::HashMap;
use uuid::Uuid;

use super::Readiness;
use crate::{
    audit::{AuditEntry, AuditRepo},
    bot::{
        models::{CaptchaChallenge, CaptchaVerification, LoginAttempt},
        BlockedIp, BotRepo, HoneypotAccount, HoneypotActivity,
    },
    credentials::{password_matches, CredentialStore, UserRef},
    devices::{
        AlertAction, AttemptHistory, ConfirmedBy, DeviceFingerprint, DeviceRepo, TrustedDevice,
        UnknownDeviceAlert,
    },
    notifications::{NotificationChannel, NotificationEvent, NotificationPreference, NotificationRepo},
    sessions::{Activity, SessionRepo, Token, TokenGroup},
    two_factor::{
        models::{RecoveryCode, TwoFactorState},
        ChallengeStatus, TwoFactorChallenge, TwoFactorRepo, TwoFactorStateKind,
    },
};

#[derive(Clone, Debug)]
struct StoredUser {
    id: Uuid,
    email: String,
    password_hash: String,
}

#[derive(Default)]
struct State {
    users: Vec<StoredUser>,
    groups: HashMap<Uuid, TokenGroup>,
    tokens: Vec<Token>,
    activities: Vec<Activity>,
    two_factor: HashMap<Uuid, TwoFactorState>,
    recovery_codes: Vec<RecoveryCode>,
    challenges: HashMap<Uuid, TwoFactorChallenge>,
    trusted: Vec<TrustedDevice>,
    alerts: Vec<UnknownDeviceAlert>,
    fingerprints: Vec<DeviceFingerprint>,
    notification_preferences: Vec<NotificationPreference>,
    attempts: Vec<LoginAttempt>,
    blocks: HashMap<String, BlockedIp>,
    captchas: HashMap<Uuid, CaptchaChallenge>,
    captcha_verifications: Vec<CaptchaVerification>,
    honeypots: Vec<HoneypotAccount>,
    honeypot_activity: Vec<HoneypotActivity>,
    audit: Vec<AuditEntry>,
    fail_bot: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user with an Argon2 password hash.
    ///
    /// # Errors
    /// Returns an error if hashing fails.
    pub fn add_user(&self, email: &str, password: &str) -> Result<Uuid> {
        let params = argon2::Params::new(8, 1, 1, None).map_err(|e| anyhow!("{e}"))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow!("failed to hash password: {e}"))?
            .to_string();
        let id = Uuid::new_v4();
        self.state.lock().users.push(StoredUser {
            id,
            email: email.to_string(),
            password_hash,
        });
        Ok(id)
    }

    /// Persisted audit entries in append order.
    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state.lock().audit.clone()
    }

    #[must_use]
    pub fn captcha(&self, challenge_id: Uuid) -> Option<CaptchaChallenge> {
        self.state.lock().captchas.get(&challenge_id).cloned()
    }

    #[must_use]
    pub fn captcha_verifications(&self, challenge_id: Uuid) -> Vec<CaptchaVerification> {
        self.state
            .lock()
            .captcha_verifications
            .iter()
            .filter(|v| v.challenge_id == challenge_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn login_attempts(&self) -> Vec<LoginAttempt> {
        self.state.lock().attempts.clone()
    }

    /// Make every bot-prevention call fail, to exercise fail-open paths.
    pub fn fail_bot_store(&self, fail: bool) {
        self.state.lock().fail_bot = fail;
    }

    fn bot_state(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let state = self.state.lock();
        if state.fail_bot {
            return Err(anyhow!("bot store unavailable"));
        }
        Ok(state)
    }
}

fn revoke_group_locked(state: &mut State, group_id: Uuid, now: DateTime<Utc>) -> bool {
    state.tokens.retain(|t| t.group_id != group_id);
    let removed = state.groups.remove(&group_id).is_some();
    for activity in &mut state.activities {
        if activity.token_group_id == Some(group_id) && activity.logout_at.is_none() {
            activity.logout_at = Some(now);
        }
    }
    removed
}

#[async_trait]
impl Readiness for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl AuditRepo for MemoryStore {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.state.lock().audit.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn verify_password(&self, email: &str, password: &str) -> Result<Option<UserRef>> {
        let user = self
            .state
            .lock()
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email.trim()))
            .cloned();
        Ok(user.and_then(|u| {
            password_matches(password, &u.password_hash).then_some(UserRef {
                user_id: u.id,
                email: u.email,
            })
        }))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<UserRef>> {
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .find(|u| u.id == user_id)
            .map(|u| UserRef {
                user_id: u.id,
                email: u.email.clone(),
            }))
    }
}

#[async_trait]
impl SessionRepo for MemoryStore {
    async fn insert_session(
        &self,
        group: &TokenGroup,
        tokens: &[Token],
        activity: &Activity,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.groups.contains_key(&group.id) {
            return Err(anyhow!("duplicate token group {}", group.id));
        }
        state.groups.insert(group.id, group.clone());
        state.tokens.extend(tokens.iter().cloned());
        state.activities.push(activity.clone());
        Ok(())
    }

    async fn revoke_group(&self, group_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(revoke_group_locked(&mut self.state.lock(), group_id, now))
    }

    async fn deactivate(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(group_id) = state
            .activities
            .iter()
            .find(|a| a.session_id == session_id && a.user_id == user_id && a.logout_at.is_none())
            .map(|a| a.token_group_id)
        else {
            return Ok(false);
        };
        if let Some(group_id) = group_id {
            revoke_group_locked(&mut state, group_id, now);
        }
        for activity in &mut state.activities {
            if activity.session_id == session_id && activity.logout_at.is_none() {
                activity.logout_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn list_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Activity>> {
        let state = self.state.lock();
        let mut active: Vec<Activity> = state
            .activities
            .iter()
            .filter(|a| a.user_id == user_id && a.logout_at.is_none())
            .filter(|a| {
                a.token_group_id
                    .and_then(|id| state.groups.get(&id))
                    .is_some_and(|g| g.expires_at > now)
            })
            .cloned()
            .collect();
        active.sort_by(|a, b| b.login_at.cmp(&a.login_at));
        Ok(active)
    }

    async fn find_group(&self, group_id: Uuid) -> Result<Option<TokenGroup>> {
        Ok(self.state.lock().groups.get(&group_id).cloned())
    }

    async fn list_tokens(&self, group_id: Uuid) -> Result<Vec<Token>> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .filter(|t| t.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn find_token_by_hash(&self, token_hash: &[u8]) -> Result<Option<Token>> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .find(|t| t.token_hash == token_hash)
            .cloned())
    }

    async fn find_activity(&self, session_id: Uuid) -> Result<Option<Activity>> {
        Ok(self
            .state
            .lock()
            .activities
            .iter()
            .find(|a| a.session_id == session_id)
            .cloned())
    }
}

#[async_trait]
impl TwoFactorRepo for MemoryStore {
    async fn load_state(&self, user_id: Uuid) -> Result<Option<TwoFactorState>> {
        Ok(self.state.lock().two_factor.get(&user_id).cloned())
    }

    async fn save_pending(
        &self,
        user_id: Uuid,
        secret_ciphertext: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        if state
            .two_factor
            .get(&user_id)
            .is_some_and(|s| s.state == TwoFactorStateKind::Enabled)
        {
            return Ok(false);
        }
        state.two_factor.insert(
            user_id,
            TwoFactorState {
                user_id,
                state: TwoFactorStateKind::Pending,
                secret_ciphertext: Some(secret_ciphertext.to_vec()),
                updated_at: now,
            },
        );
        Ok(true)
    }

    async fn enable(
        &self,
        user_id: Uuid,
        codes: &[RecoveryCode],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(current) = state
            .two_factor
            .get_mut(&user_id)
            .filter(|s| s.state == TwoFactorStateKind::Pending)
        else {
            return Ok(false);
        };
        current.state = TwoFactorStateKind::Enabled;
        current.updated_at = now;
        state.recovery_codes.retain(|c| c.user_id != user_id);
        state.recovery_codes.extend(codes.iter().cloned());
        Ok(true)
    }

    async fn disable(&self, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        state.recovery_codes.retain(|c| c.user_id != user_id);
        state.challenges.retain(|_, c| c.user_id != user_id);
        Ok(state.two_factor.remove(&user_id).is_some())
    }

    async fn list_unused_recovery_codes(&self, user_id: Uuid) -> Result<Vec<RecoveryCode>> {
        let mut codes: Vec<RecoveryCode> = self
            .state
            .lock()
            .recovery_codes
            .iter()
            .filter(|c| c.user_id == user_id && c.used_at.is_none())
            .cloned()
            .collect();
        codes.sort_by_key(|c| c.position);
        Ok(codes)
    }

    async fn consume_recovery_code(&self, code_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .recovery_codes
            .iter_mut()
            .find(|c| c.id == code_id && c.used_at.is_none())
        {
            Some(code) => {
                code.used_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_challenge(&self, challenge: &TwoFactorChallenge) -> Result<()> {
        self.state
            .lock()
            .challenges
            .insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn find_challenge(&self, challenge_id: Uuid) -> Result<Option<TwoFactorChallenge>> {
        Ok(self.state.lock().challenges.get(&challenge_id).cloned())
    }

    async fn record_failed_attempt(
        &self,
        challenge_id: Uuid,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<TwoFactorChallenge>> {
        let mut state = self.state.lock();
        let Some(challenge) = state
            .challenges
            .get_mut(&challenge_id)
            .filter(|c| c.status == ChallengeStatus::Pending)
        else {
            return Ok(None);
        };
        challenge.attempts += 1;
        if challenge.attempts >= max_attempts {
            challenge.status = ChallengeStatus::Failed;
            challenge.completed_at = Some(now);
        }
        Ok(Some(challenge.clone()))
    }

    async fn complete_challenge(&self, challenge_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.lock();
        match state
            .challenges
            .get_mut(&challenge_id)
            .filter(|c| c.status == ChallengeStatus::Pending)
        {
            Some(challenge) => {
                challenge.status = ChallengeStatus::Verified;
                challenge.completed_at = Some(now);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl DeviceRepo for MemoryStore {
    async fn find_trusted(
        &self,
        user_id: Uuid,
        device_uid: &str,
    ) -> Result<Option<TrustedDevice>> {
        Ok(self
            .state
            .lock()
            .trusted
            .iter()
            .find(|d| d.user_id == user_id && d.device_uid == device_uid)
            .cloned())
    }

    async fn list_trusted(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<TrustedDevice>> {
        let mut devices: Vec<TrustedDevice> = self
            .state
            .lock()
            .trusted
            .iter()
            .filter(|d| d.user_id == user_id && d.expires_at > now)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(devices)
    }

    async fn upsert_trusted(&self, device: &TrustedDevice) -> Result<TrustedDevice> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .trusted
            .iter_mut()
            .find(|d| d.user_id == device.user_id && d.device_uid == device.device_uid)
        {
            if device.name.is_some() {
                existing.name.clone_from(&device.name);
            }
            existing.last_ip.clone_from(&device.last_ip);
            existing.last_user_agent.clone_from(&device.last_user_agent);
            existing.last_location.clone_from(&device.last_location);
            existing.last_seen_at = device.last_seen_at;
            existing.expires_at = device.expires_at;
            return Ok(existing.clone());
        }
        state.trusted.push(device.clone());
        Ok(device.clone())
    }

    async fn touch_trusted(
        &self,
        user_id: Uuid,
        device_uid: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(device) = self
            .state
            .lock()
            .trusted
            .iter_mut()
            .find(|d| d.user_id == user_id && d.device_uid == device_uid)
        {
            device.last_seen_at = now;
        }
        Ok(())
    }

    async fn remove_trusted(&self, user_id: Uuid, device_uid: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.trusted.len();
        state
            .trusted
            .retain(|d| !(d.user_id == user_id && d.device_uid == device_uid));
        Ok(state.trusted.len() < before)
    }

    async fn insert_alert(&self, alert: &UnknownDeviceAlert) -> Result<()> {
        self.state.lock().alerts.push(alert.clone());
        Ok(())
    }

    async fn find_alert(&self, alert_id: Uuid) -> Result<Option<UnknownDeviceAlert>> {
        Ok(self
            .state
            .lock()
            .alerts
            .iter()
            .find(|a| a.id == alert_id)
            .cloned())
    }

    async fn find_latest_alert(
        &self,
        user_id: Uuid,
        device_uid: &str,
    ) -> Result<Option<UnknownDeviceAlert>> {
        Ok(self
            .state
            .lock()
            .alerts
            .iter()
            .rev()
            .find(|a| a.user_id == user_id && a.device_uid == device_uid)
            .cloned())
    }

    async fn list_alerts(&self, user_id: Uuid) -> Result<Vec<UnknownDeviceAlert>> {
        let mut alerts: Vec<UnknownDeviceAlert> = self
            .state
            .lock()
            .alerts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(alerts)
    }

    async fn resolve_alert(
        &self,
        alert_id: Uuid,
        action: AlertAction,
        confirmed_by: ConfirmedBy,
        now: DateTime<Utc>,
    ) -> Result<Option<UnknownDeviceAlert>> {
        let mut state = self.state.lock();
        let Some(alert) = state
            .alerts
            .iter_mut()
            .find(|a| a.id == alert_id && a.confirmed_by == ConfirmedBy::None)
        else {
            return Ok(None);
        };
        alert.action = action;
        alert.confirmed_by = confirmed_by;
        alert.confirmed_at = Some(now);
        Ok(Some(alert.clone()))
    }

    async fn count_blocked_alerts(&self, user_id: Uuid, ip: &str) -> Result<i64> {
        let count = self
            .state
            .lock()
            .alerts
            .iter()
            .filter(|a| {
                a.user_id == user_id
                    && a.ip.as_deref() == Some(ip)
                    && a.action == AlertAction::Blocked
            })
            .count();
        Ok(i64::try_from(count)?)
    }

    async fn find_fingerprint(
        &self,
        user_id: Uuid,
        fingerprint_hash: &str,
    ) -> Result<Option<DeviceFingerprint>> {
        Ok(self
            .state
            .lock()
            .fingerprints
            .iter()
            .find(|f| f.user_id == user_id && f.fingerprint_hash == fingerprint_hash)
            .cloned())
    }

    async fn upsert_fingerprint(
        &self,
        fingerprint: &DeviceFingerprint,
    ) -> Result<DeviceFingerprint> {
        let mut state = self.state.lock();
        if let Some(existing) = state.fingerprints.iter_mut().find(|f| {
            f.user_id == fingerprint.user_id && f.fingerprint_hash == fingerprint.fingerprint_hash
        }) {
            if fingerprint.device_uid.is_some() {
                existing.device_uid.clone_from(&fingerprint.device_uid);
            }
            if fingerprint.user_agent.is_some() {
                existing.user_agent.clone_from(&fingerprint.user_agent);
            }
            existing.seen_count += 1;
            existing.last_seen_at = fingerprint.last_seen_at;
            return Ok(existing.clone());
        }
        let stored = DeviceFingerprint {
            seen_count: 1,
            first_seen_at: fingerprint.last_seen_at,
            ..fingerprint.clone()
        };
        state.fingerprints.push(stored.clone());
        Ok(stored)
    }

    async fn list_fingerprints(&self, user_id: Uuid) -> Result<Vec<DeviceFingerprint>> {
        let mut fingerprints: Vec<DeviceFingerprint> = self
            .state
            .lock()
            .fingerprints
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect();
        fingerprints.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(fingerprints)
    }
}

#[async_trait]
impl NotificationRepo for MemoryStore {
    async fn insert_preference(&self, preference: &NotificationPreference) -> Result<bool> {
        let mut state = self.state.lock();
        let exists = state.notification_preferences.iter().any(|p| {
            p.user_id == preference.user_id
                && p.event == preference.event
                && p.channel == preference.channel
        });
        if exists {
            return Ok(false);
        }
        state.notification_preferences.push(preference.clone());
        Ok(true)
    }

    async fn list_preferences(&self, user_id: Uuid) -> Result<Vec<NotificationPreference>> {
        let mut preferences: Vec<NotificationPreference> = self
            .state
            .lock()
            .notification_preferences
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        preferences.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(preferences)
    }

    async fn update_preference(
        &self,
        id: Uuid,
        user_id: Uuid,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<Option<NotificationPreference>> {
        let mut state = self.state.lock();
        let Some(preference) = state
            .notification_preferences
            .iter_mut()
            .find(|p| p.id == id && p.user_id == user_id)
        else {
            return Ok(None);
        };
        preference.enabled = enabled;
        preference.updated_at = now;
        Ok(Some(preference.clone()))
    }

    async fn find_preference(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        channel: NotificationChannel,
    ) -> Result<Option<NotificationPreference>> {
        Ok(self
            .state
            .lock()
            .notification_preferences
            .iter()
            .find(|p| p.user_id == user_id && p.event == event && p.channel == channel)
            .cloned())
    }
}

fn failures_since(state: &State, ip: &str, since: DateTime<Utc>) -> Result<i64> {
    let count = state
        .attempts
        .iter()
        .filter(|a| !a.success && a.ip.as_deref() == Some(ip) && a.created_at >= since)
        .count();
    Ok(i64::try_from(count)?)
}

#[async_trait]
impl AttemptHistory for MemoryStore {
    async fn recent_failures(&self, ip: &str, since: DateTime<Utc>) -> Result<i64> {
        let state = self.state.lock();
        failures_since(&state, ip, since)
    }
}

#[async_trait]
impl BotRepo for MemoryStore {
    async fn insert_attempt(&self, attempt: &LoginAttempt) -> Result<()> {
        self.bot_state()?.attempts.push(attempt.clone());
        Ok(())
    }

    async fn count_failures_since(&self, ip: &str, since: DateTime<Utc>) -> Result<i64> {
        let state = self.bot_state()?;
        failures_since(&state, ip, since)
    }

    async fn find_block(&self, ip: &str) -> Result<Option<BlockedIp>> {
        Ok(self.bot_state()?.blocks.get(ip).cloned())
    }

    async fn upsert_block(&self, block: &BlockedIp) -> Result<BlockedIp> {
        let mut state = self.bot_state()?;
        let stored = match state.blocks.get(&block.ip) {
            Some(existing) => BlockedIp {
                created_at: existing.created_at,
                ..block.clone()
            },
            None => block.clone(),
        };
        state.blocks.insert(block.ip.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete_block(&self, ip: &str) -> Result<bool> {
        Ok(self.bot_state()?.blocks.remove(ip).is_some())
    }

    async fn list_blocks(&self, now: DateTime<Utc>) -> Result<Vec<BlockedIp>> {
        let mut blocks: Vec<BlockedIp> = self
            .bot_state()?
            .blocks
            .values()
            .filter(|b| b.is_active(now))
            .cloned()
            .collect();
        blocks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(blocks)
    }

    async fn insert_captcha(&self, challenge: &CaptchaChallenge) -> Result<()> {
        self.bot_state()?
            .captchas
            .insert(challenge.id, challenge.clone());
        Ok(())
    }

    async fn find_captcha(&self, challenge_id: Uuid) -> Result<Option<CaptchaChallenge>> {
        Ok(self.bot_state()?.captchas.get(&challenge_id).cloned())
    }

    async fn increment_captcha_attempts(&self, challenge_id: Uuid) -> Result<Option<i32>> {
        Ok(self
            .bot_state()?
            .captchas
            .get_mut(&challenge_id)
            .map(|c| {
                c.attempt_count += 1;
                c.attempt_count
            }))
    }

    async fn mark_captcha_used(&self, challenge_id: Uuid) -> Result<bool> {
        let mut state = self.bot_state()?;
        match state.captchas.get_mut(&challenge_id).filter(|c| !c.used) {
            Some(challenge) => {
                challenge.used = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_captcha_verification(&self, verification: &CaptchaVerification) -> Result<()> {
        self.bot_state()?
            .captcha_verifications
            .push(verification.clone());
        Ok(())
    }

    async fn find_honeypot(&self, email: &str) -> Result<Option<HoneypotAccount>> {
        Ok(self
            .bot_state()?
            .honeypots
            .iter()
            .find(|h| h.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn upsert_honeypot(&self, account: &HoneypotAccount) -> Result<HoneypotAccount> {
        let mut state = self.bot_state()?;
        if let Some(existing) = state
            .honeypots
            .iter_mut()
            .find(|h| h.email.eq_ignore_ascii_case(&account.email))
        {
            existing.severity = account.severity;
            return Ok(existing.clone());
        }
        state.honeypots.push(account.clone());
        Ok(account.clone())
    }

    async fn insert_honeypot_activity(&self, activity: &HoneypotActivity) -> Result<()> {
        self.bot_state()?.honeypot_activity.push(activity.clone());
        Ok(())
    }

    async fn list_honeypot_activity(&self, limit: i64) -> Result<Vec<HoneypotActivity>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .bot_state()?
            .honeypot_activity
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}
