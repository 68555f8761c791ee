use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info_span, Instrument};
use url::Url;

use super::{KeyError, KeyResolver, PublicKeyResponse};
use crate::APP_USER_AGENT;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Fetches the issuer key from the key server on every call.
#[derive(Clone, Debug)]
pub struct HttpKeyResolver {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpKeyResolver {
    /// # Errors
    /// Returns an error if the base URL is invalid or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)?.join("/public-key")?;
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl KeyResolver for HttpKeyResolver {
    async fn public_key(&self, issuer: &str) -> Result<String, KeyError> {
        if issuer.trim().is_empty() {
            return Err(KeyError::MissingIssuer);
        }
        let span = info_span!("keyserver.public_key", issuer = %issuer);
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("issuer", issuer)])
            .send()
            .instrument(span)
            .await
            .map_err(|e| KeyError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            debug!("Key server answered {status} for issuer {issuer}");
            return Err(KeyError::Status(status.as_u16()));
        }

        let body: PublicKeyResponse = response
            .json()
            .await
            .map_err(|e| KeyError::InvalidResponse(e.to_string()))?;
        if body.public_key.trim().is_empty() {
            return Err(KeyError::InvalidResponse("empty public key".to_string()));
        }
        Ok(body.public_key)
    }
}
