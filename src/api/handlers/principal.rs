//! Bearer-token principal extraction and the admin gate.

use axum::http::HeaderMap;
use tracing::warn;

use crate::{api::Services, error::Error, verify::VerifiedIdentity};

/// Verify the bearer token, or return 401.
pub async fn require_identity(
    headers: &HeaderMap,
    services: &Services,
) -> Result<VerifiedIdentity, Error> {
    services.verifier.authenticate(headers).await
}

/// Verify the bearer token and require the admin capability.
pub async fn require_admin(
    headers: &HeaderMap,
    services: &Services,
) -> Result<VerifiedIdentity, Error> {
    let identity = require_identity(headers, services).await?;
    if !services.admin.is_admin(&identity) {
        warn!("Non-admin {} attempted an admin action", identity.user_id);
        return Err(Error::Forbidden);
    }
    Ok(identity)
}
