use crate::{
    admin::EmailDomainAdmin,
    api::{self, Services},
    audit::AuditLog,
    bot::{BotConfig, BotService, HoneypotPolicy},
    cli::commands::{security, tokens, vault::Options as VaultOptions},
    clock::{Clock, SystemClock},
    crypto,
    devices::{DeviceConfig, DeviceService, RuleBasedScorer},
    keys::HttpKeyResolver,
    notifications::NotificationService,
    sessions::{SessionConfig, SessionService, TokenSigner},
    store::PgStore,
    two_factor::{RecoveryHasher, TwoFactorConfig, TwoFactorService},
    vault,
    verify::SessionVerifier,
};
use anyhow::{anyhow, Context, Result};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

const SIGNING_KEY_FIELD: &str = "signing_key_pem";
const TOKEN_KEY_FIELD: &str = "token_key_b64";
const TWO_FACTOR_KEY_FIELD: &str = "two_factor_key_b64";
const RECOVERY_PEPPER_FIELD: &str = "recovery_pepper_b64";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub vault: VaultOptions,
    pub tokens: tokens::Options,
    pub security: security::Options,
}

/// Put the Vault-issued database username and password into `dsn`.
fn inject_credentials(dsn: &str, username: &str, password: &str) -> Result<String> {
    let mut dsn = Url::parse(dsn).context("Invalid database DSN")?;

    dsn.set_username(username)
        .map_err(|()| anyhow!("Error setting username"))?;

    dsn.set_password(Some(password))
        .map_err(|()| anyhow!("Error setting password"))?;

    Ok(dsn.to_string())
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if Vault login fails, secrets or DB credentials cannot be fetched, or
/// the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let mut globals = super::vault_login(&args.vault).await?;

    vault::database::database_creds(&mut globals)
        .await
        .context("Could not get database username and password")?;

    debug!("Global args: {:?}", globals);

    let dsn = inject_credentials(
        &args.dsn,
        &globals.vault_db_username,
        globals.vault_db_password.expose_secret(),
    )?;

    let secret = vault::kv::read_secret(&globals, &args.vault.kv_mount, &args.vault.kv_path)
        .await
        .context("Failed to load signing keys from Vault")?;

    // Renew vault token, gracefully shutdown if failed
    let (tx, rx) = mpsc::unbounded_channel();
    vault::renew::try_renew(&globals, tx.clone()).await?;
    super::shutdown_on_ctrl_c(tx);

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit = AuditLog::spawn(store.clone(), clock.clone());

    let signer = TokenSigner::from_ec_pem(
        args.tokens.issuer.clone(),
        args.tokens.algorithm,
        secret.field(SIGNING_KEY_FIELD)?.expose_secret().as_bytes(),
    )?;
    let sessions = SessionService::new(
        store.clone(),
        signer,
        secret.key_b64(TOKEN_KEY_FIELD, crypto::KEY_LEN)?,
        SessionConfig::new()
            .with_access_ttl_seconds(args.tokens.access_ttl_seconds)
            .with_refresh_ttl_seconds(args.tokens.refresh_ttl_seconds),
        clock.clone(),
        audit.clone(),
    )?;

    let two_factor = TwoFactorService::new(
        store.clone(),
        secret.key_b64(TWO_FACTOR_KEY_FIELD, crypto::KEY_LEN)?,
        RecoveryHasher::new(secret.bytes_b64(RECOVERY_PEPPER_FIELD)?),
        TwoFactorConfig::new().with_issuer(args.security.totp_issuer.clone()),
        clock.clone(),
        audit.clone(),
    )?;

    let devices = DeviceService::new(
        store.clone(),
        store.clone(),
        Arc::new(RuleBasedScorer),
        DeviceConfig::new().with_trust_ttl_days(args.security.trusted_device_ttl_days),
        clock.clone(),
        audit.clone(),
    );

    let bot = BotService::new(
        store.clone(),
        BotConfig::new().with_honeypot_policy(HoneypotPolicy {
            auto_block: args.security.honeypot_auto_block,
            ..HoneypotPolicy::default()
        }),
        clock.clone(),
        audit.clone(),
    );

    let notifications = NotificationService::new(store.clone(), clock.clone(), audit.clone());

    let verifier = SessionVerifier::new(
        Arc::new(HttpKeyResolver::new(
            &args.tokens.keyserver_url,
            args.tokens.keyserver_timeout,
        )?),
        clock.clone(),
    );

    if args.security.trusted_proxies.is_empty() {
        info!("No trusted proxies configured, forwarding headers are ignored");
    }
    if args.security.admin_domains.is_empty() {
        info!("No admin domains configured, admin routes are closed");
    }

    let services = Arc::new(Services {
        verifier,
        sessions,
        two_factor,
        devices,
        bot,
        notifications,
        credentials: store.clone(),
        admin: Arc::new(EmailDomainAdmin::new(&args.security.admin_domains)),
        readiness: store,
        audit: audit.clone(),
        trusted_proxies: args.security.trusted_proxies.clone(),
    });

    let app = api::app(services, args.security.frontend_base_url.as_deref())?;
    let served = api::serve(args.port, app, rx).await;

    audit.flush().await;
    served
}
