use crate::{
    api,
    cli::commands::vault::Options as VaultOptions,
    keys::server::{router, KeyServerState},
    vault,
};
use anyhow::{anyhow, Context, Result};
use secrecy::ExposeSecret;
use std::{fs, sync::Arc};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::info;

const PUBLIC_KEY_FIELD: &str = "public_key_pem";

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub public_key_path: Option<String>,
    pub vault: Option<VaultOptions>,
}

/// Execute the keyserver action.
///
/// # Errors
/// Returns an error if the public key cannot be loaded or is not an EC public key, or the
/// listener fails.
pub async fn execute(args: Args) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    let public_key_pem = match (&args.public_key_path, &args.vault) {
        (Some(path), _) => {
            info!("Loading public key from {path}");
            fs::read_to_string(path).with_context(|| format!("Failed to read public key: {path}"))?
        }
        (None, Some(opts)) => {
            let globals = super::vault_login(opts).await?;
            let secret = vault::kv::read_secret(&globals, &opts.kv_mount, &opts.kv_path)
                .await
                .context("Failed to load public key from Vault")?;
            vault::renew::try_renew(&globals, tx.clone()).await?;
            secret.field(PUBLIC_KEY_FIELD)?.expose_secret().to_string()
        }
        (None, None) => return Err(anyhow!("a public key path or Vault is required")),
    };

    let state = Arc::new(KeyServerState::new(public_key_pem)?);
    super::shutdown_on_ctrl_c(tx);

    let app = router(state).layer(TraceLayer::new_for_http());
    api::serve(args.port, app, rx).await
}
