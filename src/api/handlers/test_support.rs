#![allow(clippy::unwrap_used)]

//! In-memory wiring of the whole API for router tests.

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{header::AUTHORIZATION, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::Algorithm;
use secrecy::SecretSlice;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    admin::EmailDomainAdmin,
    api::{app, Services, TrustedProxies},
    audit::AuditLog,
    bot::{BotConfig, BotService},
    clock::ManualClock,
    crypto,
    devices::{DeviceConfig, DeviceService, RuleBasedScorer},
    keys::StaticKeyResolver,
    notifications::NotificationService,
    sessions::{SessionConfig, SessionService, Subject, TokenSigner},
    store::memory::MemoryStore,
    two_factor::{
        recovery::tests::cheap_params, RecoveryHasher, TwoFactorConfig, TwoFactorService,
    },
    verify::SessionVerifier,
};

pub(crate) const ISSUER: &str = "https://custodia.test";
pub(crate) const PASSWORD: &str = "correct horse battery staple";
/// Socket peer of every request sent through [`TestApp::call`]: the load balancer.
pub(crate) const PROXY_PEER: &str = "10.0.0.1:40000";

const PRIVATE_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/testdata/es256_primary_private.pem"
));
const PUBLIC_KEY: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/testdata/es256_primary_public.pem"
));

pub(crate) struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub services: Arc<Services>,
    pub router: Router,
}

pub(crate) fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let audit = AuditLog::spawn(store.clone(), clock.clone());

    let signer = TokenSigner::from_ec_pem(
        ISSUER.to_string(),
        Algorithm::ES256,
        PRIVATE_KEY.as_bytes(),
    )
    .unwrap();
    let sessions = SessionService::new(
        store.clone(),
        signer,
        SecretSlice::from(vec![1u8; crypto::KEY_LEN]),
        SessionConfig::new(),
        clock.clone(),
        audit.clone(),
    )
    .unwrap();
    let two_factor = TwoFactorService::new(
        store.clone(),
        SecretSlice::from(vec![2u8; crypto::KEY_LEN]),
        RecoveryHasher::new(SecretSlice::from(b"pepper".to_vec())).with_params(cheap_params()),
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
    let notifications = NotificationService::new(store.clone(), clock.clone(), audit.clone());
    let verifier = SessionVerifier::new(
        Arc::new(StaticKeyResolver::new().with_key(ISSUER, PUBLIC_KEY)),
        clock.clone(),
    );

    let services = Arc::new(Services {
        verifier,
        sessions,
        two_factor,
        devices,
        bot,
        notifications,
        credentials: store.clone(),
        admin: Arc::new(EmailDomainAdmin::new(["admin.custodia.test"])),
        readiness: store.clone(),
        audit,
        trusted_proxies: TrustedProxies::parse(["10.0.0.0/8"]).unwrap(),
    });
    let router = app(services.clone(), None).unwrap();

    TestApp {
        store,
        clock,
        services,
        router,
    }
}

impl TestApp {
    /// Register a user and return a valid access token for them.
    pub(crate) async fn signed_in(&self, email: &str) -> (Uuid, String) {
        let user_id = self.store.add_user(email, PASSWORD).unwrap();
        let issued = self
            .services
            .sessions
            .issue(
                &Subject {
                    user_id,
                    email: email.to_string(),
                },
                &crate::devices::DeviceInfo::default(),
            )
            .await
            .unwrap();
        (user_id, issued.access_token)
    }

    /// Send a request through the trusted load balancer, which forwards `ip` as the client.
    pub(crate) async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        ip: Option<&str>,
    ) -> (StatusCode, Value) {
        self.call_from(PROXY_PEER, method, uri, token, body, ip)
            .await
    }

    /// Send a request from socket peer `peer` carrying `forwarded_for` verbatim.
    pub(crate) async fn call_from(
        &self,
        peer: &str,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
        forwarded_for: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(ip) = forwarded_for {
            builder = builder.header("x-forwarded-for", ip);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}
