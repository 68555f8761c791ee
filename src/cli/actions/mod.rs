pub mod keyserver;
pub mod server;

use crate::{
    cli::{
        commands::vault::{Options as VaultOptions, SecretId},
        globals::GlobalArgs,
    },
    vault,
};
use anyhow::Result;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    KeyServer(keyserver::Args),
}

impl Action {
    /// # Errors
    /// Returns an error if the selected action fails to start or stops with an error.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
            Self::KeyServer(args) => keyserver::execute(args).await,
        }
    }
}

/// Log in to Vault with `AppRole`, unwrapping the secret id first when it is wrapped.
async fn vault_login(opts: &VaultOptions) -> Result<GlobalArgs> {
    let mut globals = GlobalArgs::new(opts.url.clone());

    let secret_id = match &opts.secret_id {
        SecretId::Plain(sid) => sid.clone(),
        SecretId::Wrapped(token) => SecretString::from(
            vault::unwrap(&globals.vault_url, token.expose_secret()).await?,
        ),
    };

    let (token, lease) =
        vault::approle_login(&globals.vault_url, secret_id.expose_secret(), &opts.role_id).await?;
    info!("Logged in to Vault, token lease {lease}s");

    globals.set_token(SecretString::from(token));
    Ok(globals)
}

/// Forward Ctrl-C to the shutdown channel shared with the Vault renewal tasks.
fn shutdown_on_ctrl_c(tx: mpsc::UnboundedSender<()>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                let _ = tx.send(());
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
        }
    });
}
