use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info_span, instrument, Instrument};

const CREDS_PATH: &str = "/v1/database/creds/custodia";

#[derive(Deserialize)]
struct CredsResponse {
    lease_id: String,
    lease_duration: u64,
    data: Creds,
}

#[derive(Deserialize)]
struct Creds {
    username: String,
    password: String,
}

/// Get dynamic DB credentials from Vault and store them with their lease in `globals`.
///
/// # Errors
/// Returns an error if the Vault request fails or the response is missing expected fields.
#[instrument(skip(globals))]
pub async fn database_creds(globals: &mut GlobalArgs) -> Result<()> {
    let url = vault::endpoint_url(&globals.vault_url, CREDS_PATH)?;

    let span = info_span!("vault.database.creds", http.method = "GET");
    let response = vault::client()?
        .get(&url)
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        return Err(vault::error_from_response(&url, response).await);
    }

    let creds: CredsResponse = response
        .json()
        .await
        .context("Unexpected database credentials response")?;

    globals.vault_db_lease_id = creds.lease_id;
    globals.vault_db_lease_duration = creds.lease_duration;
    globals.vault_db_username = creds.data.username;
    globals.vault_db_password = SecretString::from(creds.data.password);

    Ok(())
}
