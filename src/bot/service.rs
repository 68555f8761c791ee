use chrono::Duration;
use rand::rngs::OsRng;
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    captcha,
    honeypot::{self, HoneypotPolicy},
    models::{
        permanent_block_sentinel, BlockedIp, CaptchaChallenge, CaptchaKind, CaptchaVerification,
        GateDecision, HoneypotAccount, HoneypotActivity, IssuedCaptcha, LoginAttempt,
    },
    repo::BotRepo,
};
use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    error::Error,
};

const DEFAULT_BLOCK_HOURS: i64 = 24;
const DEFAULT_FAILURE_WINDOW_MINUTES: i64 = 15;
const DEFAULT_CAPTCHA_AFTER_FAILURES: i64 = 3;
const DEFAULT_BLOCK_AFTER_FAILURES: i64 = 10;
const DEFAULT_CAPTCHA_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_CAPTCHA_MAX_ATTEMPTS: i32 = 5;
const MAX_ACTIVITY_LIMIT: i64 = 500;

#[derive(Clone, Debug)]
pub struct BotConfig {
    default_block_hours: i64,
    failure_window_minutes: i64,
    captcha_after_failures: i64,
    block_after_failures: i64,
    captcha_ttl_seconds: i64,
    captcha_max_attempts: i32,
    honeypot: HoneypotPolicy,
}

impl BotConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_block_hours: DEFAULT_BLOCK_HOURS,
            failure_window_minutes: DEFAULT_FAILURE_WINDOW_MINUTES,
            captcha_after_failures: DEFAULT_CAPTCHA_AFTER_FAILURES,
            block_after_failures: DEFAULT_BLOCK_AFTER_FAILURES,
            captcha_ttl_seconds: DEFAULT_CAPTCHA_TTL_SECONDS,
            captcha_max_attempts: DEFAULT_CAPTCHA_MAX_ATTEMPTS,
            honeypot: HoneypotPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_default_block_hours(mut self, hours: i64) -> Self {
        self.default_block_hours = hours;
        self
    }

    #[must_use]
    pub fn with_failure_window_minutes(mut self, minutes: i64) -> Self {
        self.failure_window_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_captcha_after_failures(mut self, failures: i64) -> Self {
        self.captcha_after_failures = failures;
        self
    }

    #[must_use]
    pub fn with_block_after_failures(mut self, failures: i64) -> Self {
        self.block_after_failures = failures;
        self
    }

    #[must_use]
    pub fn with_captcha_ttl_seconds(mut self, seconds: i64) -> Self {
        self.captcha_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_captcha_max_attempts(mut self, attempts: i32) -> Self {
        self.captcha_max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_honeypot_policy(mut self, policy: HoneypotPolicy) -> Self {
        self.honeypot = policy;
        self
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One login attempt as seen by the login handler.
#[derive(Clone, Debug, Default)]
pub struct AttemptRecord {
    pub email: String,
    pub ip: Option<String>,
    pub device_uid: Option<String>,
    pub user_id: Option<Uuid>,
    pub success: bool,
    pub risk_score: Option<i32>,
}

pub struct BotService {
    repo: Arc<dyn BotRepo>,
    config: BotConfig,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl BotService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn BotRepo>,
        config: BotConfig,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> Self {
        Self {
            repo,
            config,
            clock,
            audit,
        }
    }

    fn degraded(&self, operation: &str, err: &anyhow::Error) {
        warn!("Bot prevention degraded in {operation}: {err:#}");
        self.audit.add_log(
            AuditEvent::BotPreventionDegraded,
            format!("{operation}: {err}"),
            None,
        );
    }

    /// Append a login attempt; repeated failures from one IP end in a block.
    /// Store errors are logged and swallowed.
    pub async fn record_attempt(&self, record: AttemptRecord) {
        let now = self.clock.now();
        let attempt = LoginAttempt {
            id: Uuid::now_v7(),
            email: record.email,
            ip: record.ip,
            device_uid: record.device_uid,
            user_id: record.user_id,
            success: record.success,
            risk_score: record.risk_score,
            created_at: now,
        };
        if let Err(err) = self.repo.insert_attempt(&attempt).await {
            self.degraded("record_attempt", &err);
            return;
        }
        if attempt.success {
            return;
        }
        let Some(ip) = attempt.ip.as_deref() else {
            return;
        };

        let since = now - Duration::minutes(self.config.failure_window_minutes);
        match self.repo.count_failures_since(ip, since).await {
            Ok(failures) if failures >= self.config.block_after_failures => {
                info!("Blocking {ip} after {failures} failed logins");
                if let Err(err) = self
                    .block_ip(ip, "too many failed login attempts", None, false)
                    .await
                {
                    warn!("Failed to auto-block {ip}: {err}");
                }
            }
            Ok(_) => {}
            Err(err) => self.degraded("record_attempt", &err),
        }
    }

    /// Fails open: a store error reports the IP as not blocked.
    pub async fn is_blocked(&self, ip: &str) -> bool {
        match self.repo.find_block(ip).await {
            Ok(block) => block.is_some_and(|b| b.is_active(self.clock.now())),
            Err(err) => {
                self.degraded("is_blocked", &err);
                false
            }
        }
    }

    /// Pre-credential gate for a login from `ip`. Fails open.
    pub async fn login_gate(&self, ip: Option<&str>) -> GateDecision {
        let Some(ip) = ip else {
            return GateDecision::Allowed;
        };
        if self.is_blocked(ip).await {
            return GateDecision::Blocked;
        }
        let since = self.clock.now() - Duration::minutes(self.config.failure_window_minutes);
        match self.repo.count_failures_since(ip, since).await {
            Ok(failures) if failures >= self.config.captcha_after_failures => {
                GateDecision::CaptchaRequired
            }
            Ok(_) => GateDecision::Allowed,
            Err(err) => {
                self.degraded("login_gate", &err);
                GateDecision::Allowed
            }
        }
    }

    /// Create or overwrite the block for `ip`.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for a malformed IP or a non-positive duration.
    pub async fn block_ip(
        &self,
        ip: &str,
        reason: &str,
        duration_hours: Option<i64>,
        permanent: bool,
    ) -> Result<BlockedIp, Error> {
        let ip = canonical_ip(ip)?;
        let now = self.clock.now();
        let blocked_until = if permanent {
            permanent_block_sentinel()
        } else {
            let hours = duration_hours.unwrap_or(self.config.default_block_hours);
            if hours <= 0 {
                return Err(Error::InvalidRequest(
                    "duration must be a positive number of hours".to_string(),
                ));
            }
            Duration::try_hours(hours)
                .and_then(|d| now.checked_add_signed(d))
                .ok_or_else(|| Error::InvalidRequest("duration is too large".to_string()))?
        };
        let reason = if reason.trim().is_empty() {
            "manual block".to_string()
        } else {
            reason.trim().to_string()
        };

        let block = self
            .repo
            .upsert_block(&BlockedIp {
                ip: ip.clone(),
                reason,
                blocked_until,
                permanent,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.audit.add_log(
            AuditEvent::IpBlocked,
            format!(
                "{ip} until {} permanent={permanent} reason={}",
                block.blocked_until.to_rfc3339(),
                block.reason
            ),
            None,
        );
        Ok(block)
    }

    /// # Errors
    /// Returns `NotFound` if the IP is not blocked.
    pub async fn unblock_ip(&self, ip: &str) -> Result<(), Error> {
        let ip = canonical_ip(ip)?;
        if !self.repo.delete_block(&ip).await? {
            return Err(Error::NotFound);
        }
        self.audit
            .add_log(AuditEvent::IpUnblocked, ip.clone(), None);
        Ok(())
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_blocked(&self) -> Result<Vec<BlockedIp>, Error> {
        Ok(self.repo.list_blocks(self.clock.now()).await?)
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn issue_captcha(&self, kind: CaptchaKind) -> Result<IssuedCaptcha, Error> {
        let generated = captcha::generate(kind, &mut OsRng);
        let now = self.clock.now();
        let challenge = CaptchaChallenge {
            id: Uuid::now_v7(),
            kind,
            answer_hash: Vec::new(),
            expires_at: now + Duration::seconds(self.config.captcha_ttl_seconds),
            attempt_count: 0,
            used: false,
            created_at: now,
        };
        let challenge = CaptchaChallenge {
            answer_hash: captcha::answer_hash(challenge.id, &generated.answer),
            ..challenge
        };
        self.repo.insert_captcha(&challenge).await?;
        Ok(IssuedCaptcha {
            challenge_id: challenge.id,
            kind,
            prompt: generated.prompt,
            expires_at: challenge.expires_at,
        })
    }

    /// Check an answer. A challenge succeeds at most once.
    ///
    /// Unknown challenges and wrong answers both return `Ok(false)`.
    ///
    /// # Errors
    /// `AlreadyUsed` after a successful verification, `ChallengeExpired` once expired or
    /// past the attempt ceiling.
    pub async fn verify_captcha(
        &self,
        challenge_id: Uuid,
        response: &str,
        ip: Option<&str>,
    ) -> Result<bool, Error> {
        let Some(challenge) = self.repo.find_captcha(challenge_id).await? else {
            debug!("Unknown captcha challenge {challenge_id}");
            return Ok(false);
        };
        let attempts = self
            .repo
            .increment_captcha_attempts(challenge_id)
            .await?
            .unwrap_or(challenge.attempt_count.saturating_add(1));

        if challenge.used {
            self.record_verification(challenge_id, false, ip).await?;
            return Err(Error::AlreadyUsed);
        }
        if challenge.expires_at <= self.clock.now() || attempts > self.config.captcha_max_attempts
        {
            self.record_verification(challenge_id, false, ip).await?;
            return Err(Error::ChallengeExpired);
        }

        if captcha::answer_hash(challenge_id, response) != challenge.answer_hash {
            self.record_verification(challenge_id, false, ip).await?;
            self.audit.add_log(
                AuditEvent::CaptchaFailed,
                format!("challenge {challenge_id} ip={}", ip.unwrap_or("-")),
                None,
            );
            return Ok(false);
        }

        if !self.repo.mark_captcha_used(challenge_id).await? {
            self.record_verification(challenge_id, false, ip).await?;
            return Err(Error::AlreadyUsed);
        }
        self.record_verification(challenge_id, true, ip).await?;
        Ok(true)
    }

    async fn record_verification(
        &self,
        challenge_id: Uuid,
        success: bool,
        ip: Option<&str>,
    ) -> anyhow::Result<()> {
        self.repo
            .insert_captcha_verification(&CaptchaVerification {
                id: Uuid::now_v7(),
                challenge_id,
                success,
                ip: ip.map(str::to_string),
                created_at: self.clock.now(),
            })
            .await
    }

    /// Log any login against a decoy account and apply the block policy.
    /// Returns the recorded activity when `email` is a honeypot. Fails open.
    pub async fn check_honeypot(
        &self,
        email: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Option<HoneypotActivity> {
        let account = match self.repo.find_honeypot(email.trim()).await {
            Ok(Some(account)) => account,
            Ok(None) => return None,
            Err(err) => {
                self.degraded("check_honeypot", &err);
                return None;
            }
        };

        let policy = self.config.honeypot;
        let mut auto_blocked = false;
        if let Some(ip) = ip {
            if policy.should_block(account.severity) {
                match self
                    .block_ip(
                        ip,
                        &format!("honeypot severity {}", account.severity),
                        None,
                        policy.is_permanent(account.severity),
                    )
                    .await
                {
                    Ok(_) => auto_blocked = true,
                    Err(err) => warn!("Failed to block honeypot source {ip}: {err}"),
                }
            }
        }

        let activity = HoneypotActivity {
            id: Uuid::now_v7(),
            account_id: account.id,
            email: account.email.clone(),
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            severity: account.severity,
            auto_blocked,
            created_at: self.clock.now(),
        };
        if let Err(err) = self.repo.insert_honeypot_activity(&activity).await {
            self.degraded("check_honeypot", &err);
        }

        warn!(
            "Honeypot account {} hit from {} (severity {})",
            account.email,
            ip.unwrap_or("-"),
            account.severity
        );
        self.audit.add_log(
            AuditEvent::HoneypotTriggered,
            format!(
                "{} ip={} severity={} auto_blocked={auto_blocked}",
                account.email,
                ip.unwrap_or("-"),
                account.severity
            ),
            None,
        );
        Some(activity)
    }

    /// # Errors
    /// Returns `InvalidRequest` for a malformed email or a severity outside 1..=5.
    pub async fn add_honeypot(&self, email: &str, severity: i16) -> Result<HoneypotAccount, Error> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidRequest("a valid email is required".to_string()));
        }
        if !honeypot::valid_severity(severity) {
            return Err(Error::InvalidRequest(
                "severity must be between 1 and 5".to_string(),
            ));
        }
        Ok(self
            .repo
            .upsert_honeypot(&HoneypotAccount {
                id: Uuid::now_v7(),
                email,
                severity,
                created_at: self.clock.now(),
            })
            .await?)
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_honeypot_activity(&self, limit: i64) -> Result<Vec<HoneypotActivity>, Error> {
        Ok(self
            .repo
            .list_honeypot_activity(limit.clamp(1, MAX_ACTIVITY_LIMIT))
            .await?)
    }
}

fn canonical_ip(ip: &str) -> Result<String, Error> {
    ip.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| Error::InvalidRequest("invalid IP address".to_string()))
}
