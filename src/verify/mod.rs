//! Per-request session token verification.
//!
//! Verification runs in two typed steps. [`UnverifiedClaims`] reads the payload without
//! checking the signature and exposes nothing but the issuer, which selects the key.
//! [`VerifiedIdentity`] only exists after the signature, expiry, issuer and required
//! claims have been checked with that key. Every failure is `Unauthorized`.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{clock::Clock, error::Error, keys::KeyResolver};

/// Untrusted view of a token, used only to pick the verification key.
#[derive(Debug)]
pub struct UnverifiedClaims {
    issuer: String,
}

#[derive(Deserialize)]
struct IssuerOnly {
    iss: Option<String>,
}

impl UnverifiedClaims {
    /// Decode the payload segment without verifying anything.
    ///
    /// # Errors
    /// Returns `Unauthorized` if the token is malformed or carries no issuer.
    pub fn peek(token: &str) -> Result<Self, Error> {
        let mut parts = token.split('.');
        let (Some(_), Some(payload), Some(_), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            debug!("Token does not have three segments");
            return Err(Error::Unauthorized);
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|e| {
            debug!("Token payload is not base64url: {e}");
            Error::Unauthorized
        })?;
        let claims: IssuerOnly = serde_json::from_slice(&bytes).map_err(|e| {
            debug!("Token payload is not JSON: {e}");
            Error::Unauthorized
        })?;
        match claims.iss.filter(|iss| !iss.trim().is_empty()) {
            Some(issuer) => Ok(Self { issuer }),
            None => {
                debug!("Token has no issuer");
                Err(Error::Unauthorized)
            }
        }
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Identity established by a verified token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub email: String,
    pub issuer: String,
    pub session_id: Option<Uuid>,
}

#[derive(Deserialize)]
struct VerifiedClaims {
    iss: String,
    sub: String,
    email: Option<String>,
    exp: i64,
    sid: Option<Uuid>,
}

pub struct SessionVerifier {
    keys: Arc<dyn KeyResolver>,
    clock: Arc<dyn Clock>,
}

impl SessionVerifier {
    #[must_use]
    pub fn new(keys: Arc<dyn KeyResolver>, clock: Arc<dyn Clock>) -> Self {
        Self { keys, clock }
    }

    /// Verify a bearer token end to end.
    ///
    /// # Errors
    /// Returns `Unauthorized` for any failure, including key fetch failures.
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, Error> {
        let unverified = UnverifiedClaims::peek(token)?;

        let header = decode_header(token).map_err(|e| {
            debug!("Invalid token header: {e}");
            Error::Unauthorized
        })?;
        if !matches!(header.alg, Algorithm::ES256 | Algorithm::ES384) {
            warn!("Rejected token signed with {:?}", header.alg);
            return Err(Error::Unauthorized);
        }

        let pem = self
            .keys
            .public_key(unverified.issuer())
            .await
            .map_err(|e| {
                warn!("Key lookup failed for issuer {}: {e}", unverified.issuer());
                Error::Unauthorized
            })?;
        let key = DecodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| {
            warn!("Key server returned an unusable key: {e}");
            Error::Unauthorized
        })?;

        let mut validation = Validation::new(header.alg);
        // Expiry is checked against the injected clock below.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[unverified.issuer()]);

        let claims = decode::<VerifiedClaims>(token, &key, &validation)
            .map_err(|e| {
                debug!("Token rejected: {e}");
                Error::Unauthorized
            })?
            .claims;

        if claims.exp <= self.clock.now().timestamp() {
            debug!("Token expired");
            return Err(Error::Unauthorized);
        }
        let Ok(user_id) = Uuid::parse_str(&claims.sub) else {
            debug!("Token subject is not a user id");
            return Err(Error::Unauthorized);
        };
        let Some(email) = claims.email.filter(|e| !e.trim().is_empty()) else {
            debug!("Token has no email claim");
            return Err(Error::Unauthorized);
        };

        Ok(VerifiedIdentity {
            user_id,
            email,
            issuer: claims.iss,
            session_id: claims.sid,
        })
    }

    /// Verify the `Authorization: Bearer` header of a request.
    ///
    /// # Errors
    /// Returns `Unauthorized` if the header is missing, malformed or the token fails.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<VerifiedIdentity, Error> {
        let token = bearer_token(headers).ok_or(Error::Unauthorized)?;
        self.verify(token).await
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
