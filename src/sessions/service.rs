use anyhow::Context;
use base64::Engine;
use chrono::Duration;
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    models::{Activity, IssuedSession, Subject, Token, TokenGroup, TokenKind},
    repo::SessionRepo,
    signer::TokenSigner,
};
use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    crypto,
    devices::DeviceInfo,
    error::Error,
};

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SessionService {
    repo: Arc<dyn SessionRepo>,
    signer: TokenSigner,
    token_key: SecretSlice<u8>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl SessionService {
    /// # Errors
    /// Returns an error if `token_key` is not a 32-byte key.
    pub fn new(
        repo: Arc<dyn SessionRepo>,
        signer: TokenSigner,
        token_key: SecretSlice<u8>,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
        audit: AuditLog,
    ) -> anyhow::Result<Self> {
        if token_key.expose_secret().len() != crypto::KEY_LEN {
            anyhow::bail!("token key must be {} bytes", crypto::KEY_LEN);
        }
        Ok(Self {
            repo,
            signer,
            token_key,
            config,
            clock,
            audit,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        self.signer.issuer()
    }

    /// Issue a new session: one group, one access and one refresh token, one activity.
    ///
    /// # Errors
    /// Returns `Internal` if signing, sealing or persistence fails.
    pub async fn issue(
        &self,
        subject: &Subject,
        device: &DeviceInfo,
    ) -> Result<IssuedSession, Error> {
        let now = self.clock.now();
        let access_expires_at = now + Duration::seconds(self.config.access_ttl_seconds);
        let refresh_expires_at = now + Duration::seconds(self.config.refresh_ttl_seconds);

        let group = TokenGroup {
            id: Uuid::now_v7(),
            user_id: subject.user_id,
            device_uid: device.device_uid.clone(),
            created_at: now,
            expires_at: refresh_expires_at,
        };
        let session_id = Uuid::now_v7();

        let access_token =
            self.signer
                .sign(subject.user_id, &subject.email, session_id, now, access_expires_at)?;
        let refresh_token = generate_refresh_token()?;

        let tokens = [
            self.seal_token(group.id, TokenKind::Access, &access_token, access_expires_at)?,
            self.seal_token(group.id, TokenKind::Refresh, &refresh_token, refresh_expires_at)?,
        ];

        let activity = Activity {
            session_id,
            user_id: subject.user_id,
            login_at: now,
            logout_at: None,
            device_uid: device.device_uid.clone(),
            ip: device.ip.clone(),
            user_agent: device.user_agent.clone(),
            token_group_id: Some(group.id),
        };

        self.repo.insert_session(&group, &tokens, &activity).await?;

        info!("Issued session {} for user {}", session_id, subject.user_id);
        self.audit.add_log(
            AuditEvent::SessionIssued,
            format!("session {session_id} group {}", group.id),
            Some(subject.user_id),
        );

        Ok(IssuedSession {
            group,
            access_token,
            access_expires_at,
            refresh_token,
            activity,
        })
    }

    /// Revoke a token group and close its activity.
    ///
    /// # Errors
    /// Returns `NotFound` if the group does not exist.
    pub async fn revoke_group(&self, group_id: Uuid) -> Result<(), Error> {
        let group = self.repo.find_group(group_id).await?;
        if !self.repo.revoke_group(group_id, self.clock.now()).await? {
            return Err(Error::NotFound);
        }
        self.audit.add_log(
            AuditEvent::SessionRevoked,
            format!("group {group_id}"),
            group.map(|g| g.user_id),
        );
        Ok(())
    }

    /// Active sessions for `user_id`, newest first.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Activity>, Error> {
        Ok(self.repo.list_active(user_id, self.clock.now()).await?)
    }

    /// Log out one of the caller's own sessions.
    ///
    /// # Errors
    /// Returns `NotFound` when the session is absent, inactive, or owned by another user.
    pub async fn deactivate(&self, session_id: Uuid, user_id: Uuid) -> Result<(), Error> {
        if !self
            .repo
            .deactivate(session_id, user_id, self.clock.now())
            .await?
        {
            debug!("Deactivate rejected for session {session_id}");
            return Err(Error::NotFound);
        }
        self.audit.add_log(
            AuditEvent::SessionRevoked,
            format!("session {session_id}"),
            Some(user_id),
        );
        Ok(())
    }

    /// Consume a refresh token. The owning group is revoked so the token works once.
    ///
    /// # Errors
    /// Returns `Unauthorized` for unknown, expired or already-redeemed tokens.
    pub async fn redeem_refresh(&self, refresh_token: &str) -> Result<TokenGroup, Error> {
        let now = self.clock.now();
        let token_hash = hash_token(refresh_token);

        let Some(token) = self.repo.find_token_by_hash(&token_hash).await? else {
            return Err(Error::Unauthorized);
        };
        if token.kind != TokenKind::Refresh || token.expires_at <= now {
            return Err(Error::Unauthorized);
        }

        let aad = token_aad(token.group_id, TokenKind::Refresh);
        let opened = crypto::open(self.token_key.expose_secret(), &token.ciphertext, &aad)
            .context("failed to open refresh token")?;
        if opened != refresh_token.as_bytes() {
            return Err(Error::Unauthorized);
        }

        let Some(group) = self.repo.find_group(token.group_id).await? else {
            return Err(Error::Unauthorized);
        };
        if !self.repo.revoke_group(group.id, now).await? {
            // Lost a race with another redemption.
            return Err(Error::Unauthorized);
        }
        self.audit.add_log(
            AuditEvent::SessionRevoked,
            format!("group {} rotated", group.id),
            Some(group.user_id),
        );
        Ok(group)
    }

    fn seal_token(
        &self,
        group_id: Uuid,
        kind: TokenKind,
        raw: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> anyhow::Result<Token> {
        let aad = token_aad(group_id, kind);
        let ciphertext = crypto::seal(self.token_key.expose_secret(), raw.as_bytes(), &aad)?;
        Ok(Token {
            id: Uuid::now_v7(),
            group_id,
            kind,
            token_hash: hash_token(raw),
            ciphertext,
            created_at: self.clock.now(),
            expires_at,
        })
    }
}

fn token_aad(group_id: Uuid, kind: TokenKind) -> Vec<u8> {
    format!("session-token:v1|{group_id}|{}", kind.as_str()).into_bytes()
}

/// Create a new opaque refresh token; only its hash and sealed value are stored.
fn generate_refresh_token() -> anyhow::Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate refresh token")?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a token so raw values never touch the database.
pub(crate) fn hash_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::memory::MemoryStore};
    use jsonwebtoken::Algorithm;

    const PRIVATE_KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/es256_primary_private.pem"
    ));

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        service: SessionService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let audit = AuditLog::spawn(store.clone(), clock.clone());
        let signer = TokenSigner::from_ec_pem(
            "https://custodia.test".to_string(),
            Algorithm::ES256,
            PRIVATE_KEY.as_bytes(),
        )
        .unwrap();
        let service = SessionService::new(
            store.clone(),
            signer,
            SecretSlice::from(vec![9u8; crypto::KEY_LEN]),
            SessionConfig::new(),
            clock.clone(),
            audit,
        )
        .unwrap();
        Fixture {
            store,
            clock,
            service,
        }
    }

    fn subject() -> Subject {
        Subject {
            user_id: Uuid::new_v4(),
            email: "u1@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn issue_creates_one_group_two_tokens_and_open_activity() {
        let fx = fixture();
        let subject = subject();
        let device = DeviceInfo {
            device_uid: Some("laptop-1".to_string()),
            ..DeviceInfo::default()
        };

        let issued = fx.service.issue(&subject, &device).await.unwrap();

        let tokens = fx.store.list_tokens(issued.group.id).await.unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(
            tokens.iter().filter(|t| t.kind == TokenKind::Access).count(),
            1
        );
        assert_eq!(
            tokens.iter().filter(|t| t.kind == TokenKind::Refresh).count(),
            1
        );
        // Raw tokens are never stored.
        assert!(tokens
            .iter()
            .all(|t| t.ciphertext != issued.refresh_token.as_bytes()));

        let active = fx.service.list_active(subject.user_id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].logout_at, None);
        assert_eq!(active[0].token_group_id, Some(issued.group.id));
        assert_eq!(active[0].device_uid.as_deref(), Some("laptop-1"));
    }

    #[tokio::test]
    async fn revoke_leaves_no_orphan_tokens_and_keeps_history() {
        let fx = fixture();
        let subject = subject();
        let issued = fx.service.issue(&subject, &DeviceInfo::default()).await.unwrap();

        fx.service.revoke_group(issued.group.id).await.unwrap();

        assert!(fx.store.list_tokens(issued.group.id).await.unwrap().is_empty());
        assert!(fx.store.find_group(issued.group.id).await.unwrap().is_none());
        let activity = fx
            .store
            .find_activity(issued.activity.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(activity.logout_at, Some(fx.clock.now()));
        assert!(fx.service.list_active(subject.user_id).await.unwrap().is_empty());

        assert!(matches!(
            fx.service.revoke_group(issued.group.id).await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn deactivate_rejects_other_users() {
        let fx = fixture();
        let owner = subject();
        let issued = fx.service.issue(&owner, &DeviceInfo::default()).await.unwrap();

        let result = fx
            .service
            .deactivate(issued.activity.session_id, Uuid::new_v4())
            .await;
        assert!(matches!(result, Err(Error::NotFound)));
        assert_eq!(fx.service.list_active(owner.user_id).await.unwrap().len(), 1);

        fx.service
            .deactivate(issued.activity.session_id, owner.user_id)
            .await
            .unwrap();
        assert!(fx.service.list_active(owner.user_id).await.unwrap().is_empty());
        assert!(fx.store.list_tokens(issued.group.id).await.unwrap().is_empty());

        // Second logout of the same session is not found.
        assert!(matches!(
            fx.service
                .deactivate(issued.activity.session_id, owner.user_id)
                .await,
            Err(Error::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_groups_drop_out_of_active_list() {
        let fx = fixture();
        let subject = subject();
        fx.service.issue(&subject, &DeviceInfo::default()).await.unwrap();

        fx.clock
            .advance(Duration::seconds(DEFAULT_REFRESH_TTL_SECONDS + 1));
        assert!(fx.service.list_active(subject.user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_tokens_are_single_use() {
        let fx = fixture();
        let subject = subject();
        let issued = fx.service.issue(&subject, &DeviceInfo::default()).await.unwrap();

        let group = fx.service.redeem_refresh(&issued.refresh_token).await.unwrap();
        assert_eq!(group.id, issued.group.id);
        assert!(fx.store.list_tokens(group.id).await.unwrap().is_empty());

        assert!(matches!(
            fx.service.redeem_refresh(&issued.refresh_token).await,
            Err(Error::Unauthorized)
        ));
        assert!(matches!(
            fx.service.redeem_refresh(&issued.access_token).await,
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn rejects_short_token_keys() {
        let store = Arc::new(MemoryStore::new());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let clock = Arc::new(ManualClock::default());
        let audit = AuditLog::spawn(store.clone(), clock.clone());
        let signer = TokenSigner::from_ec_pem(
            "custodia".to_string(),
            Algorithm::ES256,
            PRIVATE_KEY.as_bytes(),
        )
        .unwrap();
        let result = SessionService::new(
            store,
            signer,
            SecretSlice::from(vec![1u8; 8]),
            SessionConfig::new(),
            clock,
            audit,
        );
        assert!(result.is_err());
    }
}
