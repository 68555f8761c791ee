//! Public-key distribution: the key server and the resolvers that call it.
//!
//! The key server holds one ECDSA public key and hands it to any caller that names an
//! issuer. Resolvers never retry; a failed fetch fails verification closed.

pub mod client;
pub mod server;

use anyhow::{Context, Result};
use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub use client::HttpKeyResolver;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("issuer is required")]
    MissingIssuer,
    #[error("no key for issuer {0}")]
    UnknownIssuer(String),
    #[error("key server request failed: {0}")]
    Transport(String),
    #[error("key server returned status {0}")]
    Status(u16),
    #[error("invalid key server response: {0}")]
    InvalidResponse(String),
}

/// Wire format of `GET /public-key`.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PublicKeyResponse {
    pub public_key: String,
}

#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// PEM-encoded ECDSA public key for `issuer`.
    async fn public_key(&self, issuer: &str) -> Result<String, KeyError>;
}

/// Fixed issuer-to-key map for in-process wiring and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, String>,
}

impl StaticKeyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_key(mut self, issuer: impl Into<String>, pem: impl Into<String>) -> Self {
        self.keys.insert(issuer.into(), pem.into());
        self
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn public_key(&self, issuer: &str) -> Result<String, KeyError> {
        self.keys
            .get(issuer)
            .cloned()
            .ok_or_else(|| KeyError::UnknownIssuer(issuer.to_string()))
    }
}

/// Reject anything that is not a PEM-encoded EC public key.
///
/// # Errors
/// Returns an error if the PEM cannot be parsed as an EC key.
pub fn validate_public_key_pem(pem: &str) -> Result<()> {
    if !pem.contains("PUBLIC KEY") {
        anyhow::bail!("expected a PEM public key");
    }
    DecodingKey::from_ec_pem(pem.as_bytes()).context("invalid EC public key")?;
    Ok(())
}
