use anyhow::{bail, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::api::TrustedProxies;

pub const ARG_ADMIN_DOMAINS: &str = "admin-domains";
pub const ARG_HONEYPOT_AUTO_BLOCK: &str = "honeypot-auto-block";
pub const ARG_TRUSTED_DEVICE_TTL_DAYS: &str = "trusted-device-ttl-days";
pub const ARG_TOTP_ISSUER: &str = "totp-issuer";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_TRUSTED_PROXIES: &str = "trusted-proxies";

#[derive(Clone, Debug)]
pub struct Options {
    pub admin_domains: Vec<String>,
    pub honeypot_auto_block: bool,
    pub trusted_device_ttl_days: i64,
    pub totp_issuer: String,
    pub frontend_base_url: Option<String>,
    pub trusted_proxies: TrustedProxies,
}

impl Options {
    /// # Errors
    /// Returns an error if the trusted-device TTL is not positive or a trusted proxy is not
    /// a valid network.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let admin_domains = matches
            .get_many::<String>(ARG_ADMIN_DOMAINS)
            .map(|values| {
                values
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let trusted_device_ttl_days = matches
            .get_one::<i64>(ARG_TRUSTED_DEVICE_TTL_DAYS)
            .copied()
            .unwrap_or(30);
        if trusted_device_ttl_days <= 0 {
            bail!("--{ARG_TRUSTED_DEVICE_TTL_DAYS} must be positive");
        }

        let trusted_proxies = TrustedProxies::parse(
            matches
                .get_many::<String>(ARG_TRUSTED_PROXIES)
                .into_iter()
                .flatten()
                .filter(|v| !v.trim().is_empty()),
        )?;

        Ok(Self {
            admin_domains,
            honeypot_auto_block: matches
                .get_one::<bool>(ARG_HONEYPOT_AUTO_BLOCK)
                .copied()
                .unwrap_or(true),
            trusted_device_ttl_days,
            totp_issuer: matches
                .get_one::<String>(ARG_TOTP_ISSUER)
                .cloned()
                .unwrap_or_else(|| "custodia".to_string()),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            trusted_proxies,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ADMIN_DOMAINS)
                .long(ARG_ADMIN_DOMAINS)
                .help("Comma separated email domains whose users may call admin routes")
                .env("CUSTODIA_ADMIN_DOMAINS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_HONEYPOT_AUTO_BLOCK)
                .long(ARG_HONEYPOT_AUTO_BLOCK)
                .help("Block source IPs that touch high severity honeypot accounts")
                .env("CUSTODIA_HONEYPOT_AUTO_BLOCK")
                .default_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new(ARG_TRUSTED_DEVICE_TTL_DAYS)
                .long(ARG_TRUSTED_DEVICE_TTL_DAYS)
                .help("Days a trusted device stays trusted without being seen")
                .env("CUSTODIA_TRUSTED_DEVICE_TTL_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOTP_ISSUER)
                .long(ARG_TOTP_ISSUER)
                .help("Issuer label shown by authenticator apps")
                .env("CUSTODIA_TOTP_ISSUER")
                .default_value("custodia"),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL allowed by CORS (any origin when unset)")
                .env("CUSTODIA_FRONTEND_BASE_URL"),
        )
        .arg(
            Arg::new(ARG_TRUSTED_PROXIES)
                .long(ARG_TRUSTED_PROXIES)
                .help("Comma separated CIDR blocks of reverse proxies whose X-Forwarded-For and X-Real-IP headers are honoured")
                .env("CUSTODIA_TRUSTED_PROXIES")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
}
