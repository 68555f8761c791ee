//! Map parsed arguments to the action the binary runs.

use crate::cli::{
    actions::{keyserver, server, Action},
    commands::{security, tokens, vault, ARG_PUBLIC_KEY_PATH, CMD_KEYSERVER, CMD_SERVER},
};
use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;

fn server_args(matches: &ArgMatches) -> Result<server::Args> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let vault = vault::Options::parse(matches)?
        .context("missing required argument: --vault-url")?;

    Ok(server::Args {
        port,
        dsn,
        vault,
        tokens: tokens::Options::parse(matches)?,
        security: security::Options::parse(matches)?,
    })
}

fn keyserver_args(matches: &ArgMatches) -> Result<keyserver::Args> {
    let public_key_path = matches
        .get_one::<String>(ARG_PUBLIC_KEY_PATH)
        .cloned()
        .filter(|v| !v.trim().is_empty());

    // A key file makes Vault unnecessary, even if its variables are set.
    let vault = match public_key_path {
        Some(_) => None,
        None => Some(
            vault::Options::parse(matches)?
                .context("missing required argument: --public-key-path or --vault-url")?,
        ),
    };

    Ok(keyserver::Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8081),
        public_key_path,
        vault,
    })
}

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVER, sub)) => Ok(Action::Server(server_args(sub)?)),
        Some((CMD_KEYSERVER, sub)) => Ok(Action::KeyServer(keyserver_args(sub)?)),
        _ => Err(anyhow!("a subcommand is required: {CMD_SERVER} or {CMD_KEYSERVER}")),
    }
}
