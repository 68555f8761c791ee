use anyhow::{anyhow, Context};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretSlice};
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    models::{
        ChallengeMethod, ChallengeStatus, CompletedChallenge, RecoveryCode, SecretSetup,
        TwoFactorChallenge, TwoFactorStateKind, TwoFactorStatus,
    },
    recovery::RecoveryHasher,
    repo::TwoFactorRepo,
};
use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    crypto,
    error::Error,
};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP_SECONDS: u64 = 30;
const DEFAULT_CHALLENGE_TTL_SECONDS: i64 = 5 * 60;
const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Clone, Debug)]
pub struct TwoFactorConfig {
    issuer: String,
    challenge_ttl_seconds: i64,
    max_attempts: i32,
}

impl TwoFactorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            issuer: "Custodia".to_string(),
            challenge_ttl_seconds: DEFAULT_CHALLENGE_TTL_SECONDS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Issuer shown by authenticator apps. Must not contain `:`.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_challenge_ttl_seconds(mut self, seconds: i64) -> Self {
        self.challenge_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TwoFactorService {
    repo: Arc<dyn TwoFactorRepo>,
    secret_key: SecretSlice<u8>,
    recovery: RecoveryHasher,
    config: TwoFactorConfig,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl TwoFactorService {
    /// # Errors
    /// Returns an error if `secret_key` is not a 32-byte key.
    pub fn new(
        repo: Arc<dyn TwoFactorRepo>,
        secret_key: SecretSlice<u8>,
        recovery: RecoveryHasher,
        config: TwoFactorConfig,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> anyhow::Result<Self> {
        if secret_key.expose_secret().len() != crypto::KEY_LEN {
            anyhow::bail!("two-factor key must be {} bytes", crypto::KEY_LEN);
        }
        Ok(Self {
            repo,
            secret_key,
            recovery,
            config,
            clock,
            audit,
        })
    }

    /// Start enrollment with a fresh secret. 2FA stays off until [`Self::verify_and_enable`].
    ///
    /// # Errors
    /// Returns `Conflict` if 2FA is already enabled.
    pub async fn generate_secret(&self, user_id: Uuid, email: &str) -> Result<SecretSetup, Error> {
        if self.current_state(user_id).await? == TwoFactorStateKind::Enabled {
            return Err(Error::Conflict(
                "two-factor authentication is already enabled".to_string(),
            ));
        }

        let secret = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow!("secret generation failed: {e:?}"))?;
        let totp = self.totp(secret.clone(), email)?;

        let ciphertext = crypto::seal(
            self.secret_key.expose_secret(),
            &secret,
            &secret_aad(user_id),
        )?;
        if !self
            .repo
            .save_pending(user_id, &ciphertext, self.clock.now())
            .await?
        {
            return Err(Error::Conflict(
                "two-factor authentication is already enabled".to_string(),
            ));
        }

        self.audit
            .add_log(AuditEvent::TwoFactorSetupStarted, "setup started", Some(user_id));

        Ok(SecretSetup {
            secret: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Confirm the pending secret with a current code and switch 2FA on.
    /// Returns the recovery codes; they are never retrievable again.
    ///
    /// # Errors
    /// Returns `InvalidRequest` without a pending setup and `InvalidCode` on a wrong code.
    pub async fn verify_and_enable(&self, user_id: Uuid, code: &str) -> Result<Vec<String>, Error> {
        let state = self.repo.load_state(user_id).await?;
        let Some(ciphertext) = state
            .filter(|s| s.state == TwoFactorStateKind::Pending)
            .and_then(|s| s.secret_ciphertext)
        else {
            return Err(Error::InvalidRequest(
                "no pending two-factor setup".to_string(),
            ));
        };

        let secret = self.open_secret(user_id, &ciphertext)?;
        if !self.check_totp(secret, code)? {
            self.audit.add_log(
                AuditEvent::TwoFactorEnableFailed,
                "invalid code",
                Some(user_id),
            );
            return Err(Error::InvalidCode);
        }

        let batch = self.recovery.generate()?;
        let rows: Vec<RecoveryCode> = batch
            .code_hashes
            .into_iter()
            .zip(0..)
            .map(|(code_hash, position)| RecoveryCode {
                id: Uuid::now_v7(),
                user_id,
                position,
                code_hash,
                used_at: None,
            })
            .collect();

        if !self.repo.enable(user_id, &rows, self.clock.now()).await? {
            return Err(Error::InvalidRequest(
                "no pending two-factor setup".to_string(),
            ));
        }

        info!("Two-factor enabled for user {user_id}");
        self.audit
            .add_log(AuditEvent::TwoFactorEnabled, "enabled", Some(user_id));
        Ok(batch.codes)
    }

    /// Raise a login challenge for a user with 2FA on.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if 2FA is not enabled.
    pub async fn create_challenge(
        &self,
        user_id: Uuid,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<TwoFactorChallenge, Error> {
        if self.current_state(user_id).await? != TwoFactorStateKind::Enabled {
            return Err(Error::InvalidRequest(
                "two-factor authentication is not enabled".to_string(),
            ));
        }
        let now = self.clock.now();
        let challenge = TwoFactorChallenge {
            id: Uuid::now_v7(),
            user_id,
            ip,
            user_agent,
            status: ChallengeStatus::Pending,
            attempts: 0,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.challenge_ttl_seconds),
            completed_at: None,
        };
        self.repo.insert_challenge(&challenge).await?;
        self.audit.add_log(
            AuditEvent::TwoFactorChallengeCreated,
            format!("challenge {}", challenge.id),
            Some(user_id),
        );
        Ok(challenge)
    }

    /// User a challenge was issued to, if the challenge exists.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn challenge_owner(&self, challenge_id: Uuid) -> Result<Option<Uuid>, Error> {
        Ok(self
            .repo
            .find_challenge(challenge_id)
            .await?
            .map(|challenge| challenge.user_id))
    }

    /// Answer a challenge with a TOTP code or an unused recovery code.
    ///
    /// Six-digit input is checked as TOTP; anything else as a recovery code.
    ///
    /// # Errors
    /// `InvalidCode` for unknown challenges and wrong codes, `ChallengeExpired` once the
    /// challenge is expired, exhausted or already completed.
    pub async fn complete_challenge(
        &self,
        challenge_id: Uuid,
        code: &str,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<CompletedChallenge, Error> {
        let now = self.clock.now();
        let Some(challenge) = self.repo.find_challenge(challenge_id).await? else {
            debug!("Unknown two-factor challenge {challenge_id}");
            return Err(Error::InvalidCode);
        };
        let user_id = challenge.user_id;

        if challenge.status != ChallengeStatus::Pending
            || challenge.expires_at <= now
            || challenge.attempts >= self.config.max_attempts
        {
            return Err(Error::ChallengeExpired);
        }

        let context = format!(
            "challenge {challenge_id} ip={} ua={}",
            ip.unwrap_or("-"),
            user_agent.unwrap_or("-")
        );

        let code = code.trim();
        let method = if is_totp_shaped(code) {
            self.check_challenge_totp(user_id, code)
                .await?
                .then_some(ChallengeMethod::Totp)
        } else {
            self.consume_recovery(user_id, code)
                .await?
                .then_some(ChallengeMethod::RecoveryCode)
        };

        let Some(method) = method else {
            let updated = self
                .repo
                .record_failed_attempt(challenge_id, self.config.max_attempts, now)
                .await?;
            self.audit.add_log(
                AuditEvent::TwoFactorChallengeFailed,
                context,
                Some(user_id),
            );
            return match updated {
                Some(_) => Err(Error::InvalidCode),
                None => Err(Error::ChallengeExpired),
            };
        };

        if !self.repo.complete_challenge(challenge_id, now).await? {
            return Err(Error::ChallengeExpired);
        }

        self.audit.add_log(
            AuditEvent::TwoFactorChallengePassed,
            context,
            Some(user_id),
        );
        Ok(CompletedChallenge { user_id, method })
    }

    /// Turn 2FA off, dropping the secret, recovery codes and open challenges.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn disable(&self, user_id: Uuid) -> Result<(), Error> {
        if self.repo.disable(user_id).await? {
            info!("Two-factor disabled for user {user_id}");
            self.audit
                .add_log(AuditEvent::TwoFactorDisabled, "disabled", Some(user_id));
        }
        Ok(())
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn status(&self, user_id: Uuid) -> Result<TwoFactorStatus, Error> {
        let state = self.current_state(user_id).await?;
        let recovery_codes_remaining = if state == TwoFactorStateKind::Enabled {
            self.repo.list_unused_recovery_codes(user_id).await?.len()
        } else {
            0
        };
        Ok(TwoFactorStatus {
            state,
            recovery_codes_remaining,
        })
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn is_enabled(&self, user_id: Uuid) -> Result<bool, Error> {
        Ok(self.current_state(user_id).await? == TwoFactorStateKind::Enabled)
    }

    async fn current_state(&self, user_id: Uuid) -> anyhow::Result<TwoFactorStateKind> {
        Ok(self
            .repo
            .load_state(user_id)
            .await?
            .map_or(TwoFactorStateKind::Disabled, |s| s.state))
    }

    async fn check_challenge_totp(&self, user_id: Uuid, code: &str) -> anyhow::Result<bool> {
        let Some(ciphertext) = self
            .repo
            .load_state(user_id)
            .await?
            .filter(|s| s.state == TwoFactorStateKind::Enabled)
            .and_then(|s| s.secret_ciphertext)
        else {
            return Ok(false);
        };
        let secret = self.open_secret(user_id, &ciphertext)?;
        self.check_totp(secret, code)
    }

    async fn consume_recovery(&self, user_id: Uuid, code: &str) -> anyhow::Result<bool> {
        for stored in self.repo.list_unused_recovery_codes(user_id).await? {
            if self.recovery.verify(code, &stored.code_hash)? {
                return self
                    .repo
                    .consume_recovery_code(stored.id, self.clock.now())
                    .await;
            }
        }
        Ok(false)
    }

    fn open_secret(&self, user_id: Uuid, ciphertext: &[u8]) -> anyhow::Result<Vec<u8>> {
        crypto::open(
            self.secret_key.expose_secret(),
            ciphertext,
            &secret_aad(user_id),
        )
        .context("failed to open two-factor secret")
    }

    fn check_totp(&self, secret: Vec<u8>, code: &str) -> anyhow::Result<bool> {
        let totp = self.totp(secret, "user")?;
        Ok(totp.check(code.trim(), unix_seconds(self.clock.as_ref())))
    }

    fn totp(&self, secret: Vec<u8>, account: &str) -> anyhow::Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP_SECONDS,
            secret,
            Some(self.config.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }
}

fn secret_aad(user_id: Uuid) -> Vec<u8> {
    format!("two-factor-secret:v1|{user_id}").into_bytes()
}

fn is_totp_shaped(code: &str) -> bool {
    code.len() == TOTP_DIGITS && code.bytes().all(|b| b.is_ascii_digit())
}

fn unix_seconds(clock: &dyn Clock) -> u64 {
    u64::try_from(clock.now().timestamp()).unwrap_or_default()
}
