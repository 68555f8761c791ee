//! Minimal Vault client: `AppRole` login, dynamic database credentials, KV v2 reads and
//! lease renewal.

pub mod database;
pub mod kv;
pub mod renew;

use crate::APP_USER_AGENT;
use anyhow::{anyhow, Result};
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, info_span, instrument, Instrument};
use url::Url;

/// Build an absolute Vault endpoint from the configured base URL.
///
/// # Errors
/// Returns an error if `url` cannot be parsed, has no host, or uses an unsupported scheme.
#[instrument]
pub fn endpoint_url(url: &str, path: &str) -> Result<String> {
    let url = Url::parse(url)?;

    let scheme = url.scheme();

    let host = url
        .host()
        .ok_or_else(|| anyhow!("Error parsing URL: no host specified"))?
        .to_owned();

    let port = match url.port() {
        Some(p) => p,
        None => match scheme {
            "http" => 80,
            "https" => 443,
            _ => return Err(anyhow!("Error parsing URL: unsupported scheme {}", scheme)),
        },
    };

    let endpoint_url = format!("{scheme}://{host}:{port}{path}");

    debug!("endpoint URL: {}", endpoint_url);

    Ok(endpoint_url)
}

pub(crate) fn client() -> Result<Client> {
    Ok(Client::builder().user_agent(APP_USER_AGENT).build()?)
}

/// Turn a non-success Vault response into an error carrying the first Vault message.
pub(crate) async fn error_from_response(url: &str, response: Response) -> anyhow::Error {
    let status = response.status();
    let message = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|body| body["errors"][0].as_str().map(ToString::to_string))
        .unwrap_or_default();
    anyhow!("{url} - {status}, {message}")
}

/// Unwrap a wrapped `AppRole` secret id
/// Create wrapped token with:
/// vault write -wrap-ttl=300s -f auth/approle/role/custodia/secret-id
///
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(token))]
pub async fn unwrap(url: &str, token: &str) -> Result<String> {
    let unwrap_url = endpoint_url(url, "/v1/sys/wrapping/unwrap")?;

    let span = info_span!("vault.unwrap", http.method = "POST");
    let response = client()?
        .post(&unwrap_url)
        .header("X-Vault-Token", token)
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(&unwrap_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let sid = json_response["data"]["secret_id"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no secret_id found"))?;

    Ok(sid.to_string())
}

/// Login to Vault using `AppRole`
/// Create a secret ID with:
/// vault write -f auth/approle/role/custodia/secret-id
///
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(sid))]
pub async fn approle_login(url: &str, sid: &str, rid: &str) -> Result<(String, u64)> {
    let login_url = endpoint_url(url, "/v1/auth/approle/login")?;

    let login_payload = json!({
        "role_id": rid,
        "secret_id": sid
    });

    debug!("login URL: {}, role ID: {}", login_url, rid);

    let span = info_span!("vault.approle.login", http.method = "POST");
    let response = client()?
        .post(&login_url)
        .json(&login_payload)
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(&login_url, response).await);
    }

    let json_response: Value = response.json().await?;
    let token = json_response["auth"]["client_token"]
        .as_str()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no client_token found"))?;
    let lease_duration = json_response["auth"]["lease_duration"]
        .as_u64()
        .unwrap_or(1800);

    Ok((token.to_string(), lease_duration))
}

/// Renew the current Vault token, returning the new lease duration in seconds.
///
/// # Errors
/// Returns an error if the Vault request fails or the response has no lease duration.
#[instrument(skip(token))]
pub async fn renew_token(url: &str, token: &SecretString) -> Result<u64> {
    let renew_url = endpoint_url(url, "/v1/auth/token/renew-self")?;

    let response = client()?
        .post(&renew_url)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(&renew_url, response).await);
    }

    let json_response: Value = response.json().await?;

    json_response["auth"]["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew a dynamic secret lease (the database credentials).
///
/// # Errors
/// Returns an error if the Vault request fails or the response has no lease duration.
#[instrument(skip(token))]
pub async fn renew_lease(
    url: &str,
    token: &SecretString,
    lease_id: &str,
    increment: u64,
) -> Result<u64> {
    let renew_url = endpoint_url(url, "/v1/sys/leases/renew")?;

    let response = client()?
        .put(&renew_url)
        .header("X-Vault-Token", token.expose_secret())
        .json(&json!({ "lease_id": lease_id, "increment": increment }))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(error_from_response(&renew_url, response).await);
    }

    let json_response: Value = response.json().await?;

    json_response["lease_duration"]
        .as_u64()
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn can_bind_localhost() -> bool {
        TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn endpoint_url_fills_default_ports() {
        assert_eq!(
            endpoint_url("https://vault.tld", "/v1/sys/health").ok(),
            Some("https://vault.tld:443/v1/sys/health".to_string())
        );
        assert_eq!(
            endpoint_url("http://vault.tld:8200/ignored", "/v1/x").ok(),
            Some("http://vault.tld:8200/v1/x".to_string())
        );
        assert!(endpoint_url("ftp://vault.tld", "/v1/x").is_err());
        assert!(endpoint_url("not a url", "/v1/x").is_err());
    }

    #[tokio::test]
    async fn approle_login_returns_token_and_lease() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/auth/approle/login"))
            .and(body_json(json!({"role_id": "rid", "secret_id": "sid"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "auth": {"client_token": "s.token", "lease_duration": 600}
            })))
            .mount(&server)
            .await;

        let (token, lease) = approle_login(&server.uri(), "sid", "rid").await?;
        assert_eq!(token, "s.token");
        assert_eq!(lease, 600);
        Ok(())
    }

    #[tokio::test]
    async fn unwrap_surfaces_vault_errors() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/sys/wrapping/unwrap"))
            .and(header("X-Vault-Token", "wrapped"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"errors": ["wrapping token is not valid"]})),
            )
            .mount(&server)
            .await;

        let err = unwrap(&server.uri(), "wrapped").await.err();
        let message = err.map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("wrapping token is not valid"), "{message}");
        Ok(())
    }

    #[tokio::test]
    async fn renew_lease_reads_lease_duration() -> Result<()> {
        if !can_bind_localhost() {
            eprintln!("Skipping test: cannot bind localhost");
            return Ok(());
        }
        let server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/v1/sys/leases/renew"))
            .and(header("X-Vault-Token", "vault-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lease_id": "database/creds/custodia/abc",
                "lease_duration": 3600
            })))
            .mount(&server)
            .await;

        let token = SecretString::from("vault-token".to_string());
        let lease = renew_lease(&server.uri(), &token, "database/creds/custodia/abc", 3600).await?;
        assert_eq!(lease, 3600);
        Ok(())
    }
}
