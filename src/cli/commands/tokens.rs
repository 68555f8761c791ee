use crate::{keys::client::DEFAULT_TIMEOUT, sessions::parse_algorithm};
use anyhow::{bail, Result};
use clap::{Arg, ArgMatches, Command};
use jsonwebtoken::Algorithm;
use std::time::Duration;

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_SIGNING_ALGORITHM: &str = "signing-algorithm";
pub const ARG_ACCESS_TTL: &str = "access-token-ttl-seconds";
pub const ARG_REFRESH_TTL: &str = "refresh-token-ttl-seconds";
pub const ARG_KEYSERVER_URL: &str = "keyserver-url";
pub const ARG_KEYSERVER_TIMEOUT_MS: &str = "keyserver-timeout-ms";

/// Token signing and verification settings.
#[derive(Clone, Debug)]
pub struct Options {
    pub issuer: String,
    pub algorithm: Algorithm,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub keyserver_url: String,
    pub keyserver_timeout: Duration,
}

impl Options {
    /// # Errors
    /// Returns an error for a blank issuer, an unsupported algorithm or non-positive TTLs.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let issuer = matches
            .get_one::<String>(ARG_ISSUER)
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        if issuer.is_empty() {
            bail!("missing required argument: --{ARG_ISSUER}");
        }

        let algorithm = parse_algorithm(
            matches
                .get_one::<String>(ARG_SIGNING_ALGORITHM)
                .map_or("ES256", String::as_str),
        )?;

        let access_ttl_seconds = matches.get_one::<i64>(ARG_ACCESS_TTL).copied().unwrap_or(900);
        let refresh_ttl_seconds = matches
            .get_one::<i64>(ARG_REFRESH_TTL)
            .copied()
            .unwrap_or(2_592_000);
        if access_ttl_seconds <= 0 || refresh_ttl_seconds <= 0 {
            bail!("token TTLs must be positive");
        }

        let Some(keyserver_url) = matches
            .get_one::<String>(ARG_KEYSERVER_URL)
            .cloned()
            .filter(|v| !v.trim().is_empty())
        else {
            bail!("missing required argument: --{ARG_KEYSERVER_URL}");
        };

        let keyserver_timeout = matches
            .get_one::<u64>(ARG_KEYSERVER_TIMEOUT_MS)
            .copied()
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis);

        Ok(Self {
            issuer,
            algorithm,
            access_ttl_seconds,
            refresh_ttl_seconds,
            keyserver_url,
            keyserver_timeout,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Issuer (iss) written into access tokens")
                .env("CUSTODIA_ISSUER")
                .required(true),
        )
        .arg(
            Arg::new(ARG_SIGNING_ALGORITHM)
                .long(ARG_SIGNING_ALGORITHM)
                .help("Access token signing algorithm: ES256 or ES384")
                .env("CUSTODIA_SIGNING_ALGORITHM")
                .default_value("ES256"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL)
                .long(ARG_ACCESS_TTL)
                .help("Access token TTL in seconds")
                .env("CUSTODIA_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL)
                .long(ARG_REFRESH_TTL)
                .help("Refresh token and token group TTL in seconds")
                .env("CUSTODIA_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_KEYSERVER_URL)
                .long(ARG_KEYSERVER_URL)
                .help("Base URL of the public key server, example: http://keyserver:8081")
                .env("CUSTODIA_KEYSERVER_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_KEYSERVER_TIMEOUT_MS)
                .long(ARG_KEYSERVER_TIMEOUT_MS)
                .help("Timeout for public key lookups in milliseconds")
                .env("CUSTODIA_KEYSERVER_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64)),
        )
}
