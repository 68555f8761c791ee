//! TOTP enrollment, status and challenge endpoints.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{client_ip, principal::require_identity, user_agent};
use crate::{
    api::Services,
    error::Error,
    two_factor::{ChallengeMethod, SecretSetup, TwoFactorStatus},
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RecoveryCodesResponse {
    /// Shown once. Only hashes are kept.
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ChallengeResponse {
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CompleteChallengeRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CompleteChallengeResponse {
    pub user_id: Uuid,
    pub method: ChallengeMethod,
}

#[utoipa::path(
    post,
    path = "/two-factor/setup",
    responses(
        (status = 200, description = "Pending secret and provisioning URI", body = SecretSetup),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 409, description = "Two-factor is already enabled", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn setup(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<SecretSetup>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let setup = services
        .two_factor
        .generate_secret(identity.user_id, &identity.email)
        .await?;
    Ok(Json(setup))
}

#[utoipa::path(
    post,
    path = "/two-factor/verify",
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Two-factor enabled", body = RecoveryCodesResponse),
        (status = 400, description = "No pending setup", body = crate::error::ErrorBody),
        (status = 401, description = "Wrong code or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn verify(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<RecoveryCodesResponse>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let recovery_codes = services
        .two_factor
        .verify_and_enable(identity.user_id, &request.code)
        .await?;
    Ok(Json(RecoveryCodesResponse { recovery_codes }))
}

#[utoipa::path(
    post,
    path = "/two-factor/disable",
    responses(
        (status = 204, description = "Two-factor disabled"),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn disable(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<StatusCode, Error> {
    let identity = require_identity(&headers, &services).await?;
    services.two_factor.disable(identity.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/two-factor/status",
    responses(
        (status = 200, description = "Current state and remaining recovery codes", body = TwoFactorStatus),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn status(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<TwoFactorStatus>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.two_factor.status(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/two-factor/challenge",
    responses(
        (status = 200, description = "Challenge created", body = ChallengeResponse),
        (status = 400, description = "Two-factor is not enabled", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn create_challenge(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
) -> Result<Json<ChallengeResponse>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let challenge = services
        .two_factor
        .create_challenge(
            identity.user_id,
            client_ip(&services.trusted_proxies, &headers, connect_info.as_ref()),
            user_agent(&headers),
        )
        .await?;
    Ok(Json(ChallengeResponse {
        challenge_id: challenge.id,
        expires_at: challenge.expires_at,
    }))
}

#[utoipa::path(
    post,
    path = "/two-factor/complete-challenge",
    request_body = CompleteChallengeRequest,
    responses(
        (status = 200, description = "Challenge passed", body = CompleteChallengeResponse),
        (status = 401, description = "Wrong code or unknown challenge", body = crate::error::ErrorBody),
        (status = 410, description = "Challenge expired, exhausted or already used", body = crate::error::ErrorBody),
    ),
    tag = "two-factor"
)]
pub async fn complete_challenge(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<CompleteChallengeRequest>,
) -> Result<Json<CompleteChallengeResponse>, Error> {
    let ip = client_ip(&services.trusted_proxies, &headers, connect_info.as_ref());
    let agent = user_agent(&headers);
    let completed = services
        .two_factor
        .complete_challenge(
            request.challenge_id,
            &request.code,
            ip.as_deref(),
            agent.as_deref(),
        )
        .await?;
    Ok(Json(CompleteChallengeResponse {
        user_id: completed.user_id,
        method: completed.method,
    }))
}
