pub mod logging;
pub mod security;
pub mod tokens;
pub mod vault;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ColorChoice, Command,
};

pub const CMD_SERVER: &str = "server";
pub const CMD_KEYSERVER: &str = "keyserver";
pub const ARG_PUBLIC_KEY_PATH: &str = "public-key-path";

fn port_arg(env: &'static str, default: &'static str) -> Arg {
    Arg::new("port")
        .short('p')
        .long("port")
        .help("Port to listen on")
        .default_value(default)
        .env(env)
        .value_parser(clap::value_parser!(u16))
}

fn server_command() -> Command {
    let command = Command::new(CMD_SERVER)
        .about("Serve the session and login protection API")
        .arg(port_arg("CUSTODIA_PORT", "8080"))
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .long_help(
                    "Database connection string. Username/password are injected from Vault DB creds, so they are not required in the DSN.",
                )
                .env("CUSTODIA_DSN")
                .required(true),
        );

    let command = vault::with_args(command, true);
    let command = tokens::with_args(command);
    security::with_args(command)
}

fn keyserver_command() -> Command {
    let command = Command::new(CMD_KEYSERVER)
        .about("Serve the token verification public key")
        .arg(port_arg("CUSTODIA_KEYSERVER_PORT", "8081"))
        .arg(
            Arg::new(ARG_PUBLIC_KEY_PATH)
                .long(ARG_PUBLIC_KEY_PATH)
                .help("PEM file holding the EC public key; read from Vault when unset")
                .env("CUSTODIA_PUBLIC_KEY_PATH")
                .required_unless_present(vault::ARG_VAULT_URL),
        );

    vault::with_args(command, false)
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("custodia")
        .about("Session issuance and login abuse protection")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(server_command())
        .subcommand(keyserver_command());

    logging::with_args(command)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SERVER_ENV: [&str; 14] = [
        "CUSTODIA_PORT",
        "CUSTODIA_DSN",
        "CUSTODIA_VAULT_URL",
        "CUSTODIA_VAULT_ROLE_ID",
        "CUSTODIA_VAULT_SECRET_ID",
        "CUSTODIA_VAULT_WRAPPED_TOKEN",
        "CUSTODIA_ISSUER",
        "CUSTODIA_KEYSERVER_URL",
        "CUSTODIA_ADMIN_DOMAINS",
        "CUSTODIA_LOG_LEVEL",
        "CUSTODIA_KEYSERVER_PORT",
        "CUSTODIA_PUBLIC_KEY_PATH",
        "CUSTODIA_ACCESS_TOKEN_TTL_SECONDS",
        "CUSTODIA_HONEYPOT_AUTO_BLOCK",
    ];

    fn with_clean_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(SERVER_ENV.map(|k| (k, None::<&str>)), f);
    }

    fn server_args() -> Vec<&'static str> {
        vec![
            "custodia",
            "server",
            "--dsn",
            "postgres://localhost:5432/custodia",
            "--vault-url",
            "https://vault.tld:8200",
            "--vault-role-id",
            "role-id",
            "--vault-secret-id",
            "secret-id",
            "--issuer",
            "https://auth.custodia.dev",
            "--keyserver-url",
            "http://keyserver:8081",
        ]
    }

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "custodia");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Session issuance and login abuse protection".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn server_defaults() {
        with_clean_env(|| {
            let matches = new().get_matches_from(server_args());
            let (name, sub) = matches.subcommand().unwrap();
            assert_eq!(name, CMD_SERVER);
            assert_eq!(sub.get_one::<u16>("port").copied(), Some(8080));
            assert_eq!(
                sub.get_one::<String>(tokens::ARG_SIGNING_ALGORITHM).cloned(),
                Some("ES256".to_string())
            );
            assert_eq!(sub.get_one::<i64>(tokens::ARG_ACCESS_TTL).copied(), Some(900));
            assert_eq!(
                sub.get_one::<bool>(security::ARG_HONEYPOT_AUTO_BLOCK).copied(),
                Some(true)
            );
            assert_eq!(
                sub.get_one::<String>(vault::ARG_VAULT_KV_MOUNT).cloned(),
                Some("secret/custodia".to_string())
            );
        });
    }

    #[test]
    fn server_reads_env() {
        temp_env::with_vars(
            [
                ("CUSTODIA_PORT", Some("443")),
                ("CUSTODIA_DSN", Some("postgres://localhost:5432/custodia")),
                ("CUSTODIA_VAULT_URL", Some("https://vault.tld:8200")),
                ("CUSTODIA_VAULT_ROLE_ID", Some("role_id")),
                ("CUSTODIA_VAULT_SECRET_ID", Some("secret_id")),
                ("CUSTODIA_ISSUER", Some("https://auth.custodia.dev")),
                ("CUSTODIA_KEYSERVER_URL", Some("http://keyserver:8081")),
                ("CUSTODIA_ADMIN_DOMAINS", Some("custodia.dev,ops.custodia.dev")),
                ("CUSTODIA_LOG_LEVEL", Some("info")),
            ],
            || {
                let matches = new().get_matches_from(vec!["custodia", "server"]);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    Some(2)
                );
                let (_, sub) = matches.subcommand().unwrap();
                assert_eq!(sub.get_one::<u16>("port").copied(), Some(443));
                let domains: Vec<&String> = sub
                    .get_many::<String>(security::ARG_ADMIN_DOMAINS)
                    .unwrap()
                    .collect();
                assert_eq!(domains, ["custodia.dev", "ops.custodia.dev"]);
            },
        );
    }

    #[test]
    fn test_check_log_level_verbosity() {
        for index in 0..5usize {
            with_clean_env(|| {
                let mut args: Vec<String> = server_args().into_iter().map(String::from).collect();
                if index > 0 {
                    args.push(format!("-{}", "v".repeat(index)));
                }
                let matches = new().get_matches_from(args);
                assert_eq!(
                    matches.get_one::<u8>(logging::ARG_VERBOSITY).copied(),
                    u8::try_from(index).ok()
                );
            });
        }
    }

    #[test]
    fn server_requires_dsn_and_issuer() {
        with_clean_env(|| {
            let result = new().try_get_matches_from(vec![
                "custodia",
                "server",
                "--vault-url",
                "https://vault.tld:8200",
            ]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );
        });
    }

    #[test]
    fn keyserver_needs_a_key_source() {
        with_clean_env(|| {
            let result = new().try_get_matches_from(vec!["custodia", "keyserver"]);
            assert_eq!(
                result.map_err(|e| e.kind()).err(),
                Some(clap::error::ErrorKind::MissingRequiredArgument)
            );

            let matches = new().get_matches_from(vec![
                "custodia",
                "keyserver",
                "--public-key-path",
                "/etc/custodia/public.pem",
            ]);
            let (name, sub) = matches.subcommand().unwrap();
            assert_eq!(name, CMD_KEYSERVER);
            assert_eq!(sub.get_one::<u16>("port").copied(), Some(8081));
        });
    }

    #[test]
    fn unknown_subcommand_fails() {
        let result = new().try_get_matches_from(vec!["custodia", "migrate"]);
        assert!(result.is_err());
    }
}
