use anyhow::{bail, Result};
use clap::{Arg, ArgGroup, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_VAULT_URL: &str = "vault-url";
pub const ARG_VAULT_ROLE_ID: &str = "vault-role-id";
pub const ARG_VAULT_SECRET_ID: &str = "vault-secret-id";
pub const ARG_VAULT_WRAPPED_TOKEN: &str = "vault-wrapped-token";
pub const ARG_VAULT_KV_MOUNT: &str = "vault-kv-mount";
pub const ARG_VAULT_KV_PATH: &str = "vault-kv-path";

/// How to obtain the `AppRole` secret id.
#[derive(Clone)]
pub enum SecretId {
    Plain(SecretString),
    Wrapped(SecretString),
}

impl std::fmt::Debug for SecretId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(***)"),
            Self::Wrapped(_) => f.write_str("Wrapped(***)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Options {
    pub url: String,
    pub role_id: String,
    pub secret_id: SecretId,
    pub kv_mount: String,
    pub kv_path: String,
}

impl Options {
    /// Parse Vault arguments; `None` when `--vault-url` is absent.
    ///
    /// # Errors
    /// Returns an error if a Vault URL is given without complete `AppRole` credentials.
    pub fn parse(matches: &ArgMatches) -> Result<Option<Self>> {
        let non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(url) = non_empty(ARG_VAULT_URL) else {
            return Ok(None);
        };

        let Some(role_id) = non_empty(ARG_VAULT_ROLE_ID) else {
            bail!("missing required argument: --{ARG_VAULT_ROLE_ID}");
        };

        let secret_id = match (
            non_empty(ARG_VAULT_SECRET_ID),
            non_empty(ARG_VAULT_WRAPPED_TOKEN),
        ) {
            (Some(sid), _) => SecretId::Plain(SecretString::from(sid)),
            (None, Some(token)) => SecretId::Wrapped(SecretString::from(token)),
            (None, None) => bail!(
                "missing required argument: --{ARG_VAULT_SECRET_ID} or --{ARG_VAULT_WRAPPED_TOKEN}"
            ),
        };

        Ok(Some(Self {
            url,
            role_id,
            secret_id,
            kv_mount: non_empty(ARG_VAULT_KV_MOUNT).unwrap_or_else(|| "secret/custodia".to_string()),
            kv_path: non_empty(ARG_VAULT_KV_PATH).unwrap_or_else(|| "config".to_string()),
        }))
    }
}

/// Add the Vault arguments; `required` makes `--vault-url` mandatory.
#[must_use]
pub fn with_args(command: Command, required: bool) -> Command {
    command
        .arg(
            Arg::new(ARG_VAULT_URL)
                .long(ARG_VAULT_URL)
                .help("Vault base URL, example: https://vault.tld:8200")
                .env("CUSTODIA_VAULT_URL")
                .required(required),
        )
        .arg(
            Arg::new(ARG_VAULT_ROLE_ID)
                .long(ARG_VAULT_ROLE_ID)
                .help("Vault AppRole role id")
                .env("CUSTODIA_VAULT_ROLE_ID"),
        )
        .arg(
            Arg::new(ARG_VAULT_SECRET_ID)
                .long(ARG_VAULT_SECRET_ID)
                .help("Vault AppRole secret id")
                .env("CUSTODIA_VAULT_SECRET_ID")
                .conflicts_with(ARG_VAULT_WRAPPED_TOKEN),
        )
        .arg(
            Arg::new(ARG_VAULT_WRAPPED_TOKEN)
                .long(ARG_VAULT_WRAPPED_TOKEN)
                .help("Vault wrapped token holding the AppRole secret id")
                .env("CUSTODIA_VAULT_WRAPPED_TOKEN"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_MOUNT)
                .long(ARG_VAULT_KV_MOUNT)
                .help("Vault KV-v2 mount path for configuration secrets")
                .env("CUSTODIA_VAULT_KV_MOUNT")
                .default_value("secret/custodia"),
        )
        .arg(
            Arg::new(ARG_VAULT_KV_PATH)
                .long(ARG_VAULT_KV_PATH)
                .help("Vault KV-v2 secret path for configuration secrets")
                .env("CUSTODIA_VAULT_KV_PATH")
                .default_value("config"),
        )
        .group(
            ArgGroup::new("vault-auth")
                .args([ARG_VAULT_ROLE_ID, ARG_VAULT_SECRET_ID, ARG_VAULT_WRAPPED_TOKEN])
                .multiple(true),
        )
}
