//! ECDSA signing of access tokens.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims carried by every access token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessClaims {
    pub iss: String,
    pub sub: String,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
    pub sid: Uuid,
}

pub struct TokenSigner {
    issuer: String,
    algorithm: Algorithm,
    key: EncodingKey,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("key", &"***")
            .finish()
    }
}

impl TokenSigner {
    /// Build a signer from a PKCS#8 EC private key.
    ///
    /// # Errors
    /// Returns an error if the algorithm is not ECDSA or the PEM is not an EC key.
    pub fn from_ec_pem(issuer: String, algorithm: Algorithm, private_key_pem: &[u8]) -> Result<Self> {
        if !matches!(algorithm, Algorithm::ES256 | Algorithm::ES384) {
            return Err(anyhow!("Unsupported signing algorithm: {algorithm:?}"));
        }
        let key = EncodingKey::from_ec_pem(private_key_pem).context("Invalid EC private key")?;
        Ok(Self {
            issuer,
            algorithm,
            key,
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign an access token for `user_id`/`email` bound to session `sid`.
    ///
    /// # Errors
    /// Returns an error if signing fails (e.g. curve does not match the algorithm).
    pub fn sign(
        &self,
        user_id: Uuid,
        email: &str,
        sid: Uuid,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: user_id.to_string(),
            email: email.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            sid,
        };
        encode(&Header::new(self.algorithm), &claims, &self.key).context("failed to sign access token")
    }
}

/// Parse a signing algorithm name accepted on the command line.
///
/// # Errors
/// Returns an error for anything other than `ES256` or `ES384`.
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    match name.trim().to_ascii_uppercase().as_str() {
        "ES256" => Ok(Algorithm::ES256),
        "ES384" => Ok(Algorithm::ES384),
        other => Err(anyhow!("Unsupported signing algorithm: {other}")),
    }
}
