//! Service-level scenarios over the in-memory store.
//!
//! Every service is wired the way `custodia server` wires it, except the store is
//! `MemoryStore`, the clock is manual and the key resolver is static.

#![allow(clippy::unwrap_used)]

use chrono::Duration;
use custodia::{
    audit::AuditLog,
    bot::{BotConfig, BotService},
    clock::{Clock, ManualClock},
    crypto,
    devices::{AlertAction, ConfirmedBy, DeviceConfig, DeviceInfo, DeviceService, RuleBasedScorer},
    keys::StaticKeyResolver,
    sessions::{SessionConfig, SessionRepo, SessionService, Subject, TokenKind, TokenSigner},
    store::memory::MemoryStore,
    two_factor::{RecoveryHasher, TwoFactorConfig, TwoFactorService},
    verify::SessionVerifier,
    Error,
};
use jsonwebtoken::Algorithm;
use secrecy::SecretSlice;
use std::sync::Arc;
use totp_rs::{Secret, TOTP};
use uuid::Uuid;

const ISSUER: &str = "https://custodia.test";

const PRIVATE_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/testdata/es256_primary_private.pem"
));
const PUBLIC_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/testdata/es256_primary_public.pem"
));
const ROGUE_PUBLIC_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/testdata/es256_rogue_public.pem"
));

struct Harness {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    audit: AuditLog,
    sessions: SessionService,
    two_factor: TwoFactorService,
    devices: DeviceService,
    bot: BotService,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let audit = AuditLog::spawn(store.clone(), clock.clone());

    let signer =
        TokenSigner::from_ec_pem(ISSUER.to_string(), Algorithm::ES256, PRIVATE_KEY.as_bytes())
            .unwrap();
    let sessions = SessionService::new(
        store.clone(),
        signer,
        SecretSlice::from(vec![3u8; crypto::KEY_LEN]),
        SessionConfig::new(),
        clock.clone(),
        audit.clone(),
    )
    .unwrap();

    let params = argon2::Params::new(8, 1, 1, None).unwrap();
    let two_factor = TwoFactorService::new(
        store.clone(),
        SecretSlice::from(vec![4u8; crypto::KEY_LEN]),
        RecoveryHasher::new(SecretSlice::from(b"integration-pepper".to_vec()))
            .with_params(params),
        TwoFactorConfig::new(),
        clock.clone(),
        audit.clone(),
    )
    .unwrap();

    let devices = DeviceService::new(
        store.clone(),
        store.clone(),
        Arc::new(RuleBasedScorer),
        DeviceConfig::new(),
        clock.clone(),
        audit.clone(),
    );
    let bot = BotService::new(store.clone(), BotConfig::new(), clock.clone(), audit.clone());

    Harness {
        store,
        clock,
        audit,
        sessions,
        two_factor,
        devices,
        bot,
    }
}

fn verifier(public_key: &str, clock: Arc<ManualClock>) -> SessionVerifier {
    SessionVerifier::new(
        Arc::new(StaticKeyResolver::new().with_key(ISSUER, public_key)),
        clock,
    )
}

fn laptop() -> DeviceInfo {
    DeviceInfo {
        device_uid: Some("laptop-7f3a".to_string()),
        name: Some("Work laptop".to_string()),
        ip: Some("203.0.113.10".to_string()),
        user_agent: Some("Mozilla/5.0".to_string()),
        location: None,
    }
}

#[tokio::test]
async fn new_device_raises_pending_alert_without_trusting_it() {
    let h = harness();
    let user_id = h.store.add_user("alice@example.com", "secret").unwrap();

    let detection = h.devices.detect_unknown(user_id, &laptop()).await.unwrap();

    assert!(detection.unknown);
    let alert = detection.alert.unwrap();
    assert_eq!(alert.action, AlertAction::Pending);
    assert_eq!(alert.confirmed_by, ConfirmedBy::None);
    assert_eq!(alert.device_uid, "laptop-7f3a");
    assert!((0..=100).contains(&alert.risk_score));

    assert!(h.devices.list_trusted(user_id).await.unwrap().is_empty());
    assert_eq!(h.devices.list_alerts(user_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn temporary_block_is_listed_with_its_expiry() {
    let h = harness();
    let now = h.clock.now();

    h.bot
        .block_ip("1.2.3.4", "manual", Some(2), false)
        .await
        .unwrap();

    let blocked = h.bot.list_blocked().await.unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].ip, "1.2.3.4");
    assert!(!blocked[0].permanent);
    assert_eq!(blocked[0].blocked_until, now + Duration::hours(2));
    assert!(h.bot.is_blocked("1.2.3.4").await);

    h.clock.advance(Duration::hours(2) + Duration::seconds(1));
    assert!(!h.bot.is_blocked("1.2.3.4").await);
    assert!(h.bot.list_blocked().await.unwrap().is_empty());
}

#[tokio::test]
async fn issued_session_is_owned_by_its_user() {
    let h = harness();
    let owner = h.store.add_user("u1@example.com", "secret").unwrap();
    let subject = Subject {
        user_id: owner,
        email: "u1@example.com".to_string(),
    };

    let issued = h.sessions.issue(&subject, &laptop()).await.unwrap();

    let tokens = h.store.list_tokens(issued.group.id).await.unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(
        tokens.iter().filter(|t| t.kind == TokenKind::Access).count(),
        1
    );
    assert_eq!(
        tokens.iter().filter(|t| t.kind == TokenKind::Refresh).count(),
        1
    );

    let active = h.sessions.list_active(owner).await.unwrap();
    assert_eq!(active.len(), 1);
    assert!(active[0].logout_at.is_none());
    assert_eq!(active[0].token_group_id, Some(issued.group.id));

    let session_id = issued.activity.session_id;
    let err = h
        .sessions
        .deactivate(session_id, Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound));
    assert_eq!(h.sessions.list_active(owner).await.unwrap().len(), 1);

    h.sessions.deactivate(session_id, owner).await.unwrap();
    assert!(h.sessions.list_active(owner).await.unwrap().is_empty());
    assert!(h.store.list_tokens(issued.group.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn access_token_verifies_only_against_the_issuer_key() {
    let h = harness();
    let user_id = h.store.add_user("bob@example.com", "secret").unwrap();
    let issued = h
        .sessions
        .issue(
            &Subject {
                user_id,
                email: "bob@example.com".to_string(),
            },
            &DeviceInfo::default(),
        )
        .await
        .unwrap();

    let identity = verifier(PUBLIC_KEY, h.clock.clone())
        .verify(&issued.access_token)
        .await
        .unwrap();
    assert_eq!(identity.user_id, user_id);
    assert_eq!(identity.issuer, ISSUER);
    assert_eq!(identity.session_id, Some(issued.activity.session_id));

    let err = verifier(ROGUE_PUBLIC_KEY, h.clock.clone())
        .verify(&issued.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized));

    h.clock.advance(Duration::hours(1));
    let err = verifier(PUBLIC_KEY, h.clock.clone())
        .verify(&issued.access_token)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized));
}

#[tokio::test]
async fn enabling_two_factor_hands_out_eight_recovery_codes() {
    let h = harness();
    let user_id = h.store.add_user("carol@example.com", "secret").unwrap();

    let setup = h
        .two_factor
        .generate_secret(user_id, "carol@example.com")
        .await
        .unwrap();
    assert!(!h.two_factor.is_enabled(user_id).await.unwrap());

    let secret = Secret::Encoded(setup.secret.clone()).to_bytes().unwrap();
    let totp = TOTP::new(
        totp_rs::Algorithm::SHA1,
        6,
        1,
        30,
        secret,
        None,
        "carol@example.com".to_string(),
    )
    .unwrap();
    let code = totp.generate(u64::try_from(h.clock.now().timestamp()).unwrap());

    let codes = h.two_factor.verify_and_enable(user_id, &code).await.unwrap();
    assert_eq!(codes.len(), 8);
    let mut unique = codes.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 8);
    assert!(h.two_factor.is_enabled(user_id).await.unwrap());

    let challenge = h
        .two_factor
        .create_challenge(user_id, None, None)
        .await
        .unwrap();
    h.two_factor
        .complete_challenge(challenge.id, &codes[0], None, None)
        .await
        .unwrap();
    assert_eq!(
        h.two_factor
            .status(user_id)
            .await
            .unwrap()
            .recovery_codes_remaining,
        7
    );

    h.audit.flush().await;
    assert!(!h.store.audit_entries().is_empty());
}
