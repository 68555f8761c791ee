//! Admin-only endpoints: IP blocks and honeypot accounts.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

use super::principal::require_admin;
use crate::{
    api::Services,
    bot::{BlockedIp, HoneypotAccount, HoneypotActivity},
    error::Error,
};

const DEFAULT_ACTIVITY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BlockIpRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
    /// Hours until the block lapses. Defaults to 24 when omitted.
    #[serde(default, alias = "duration")]
    pub duration_hours: Option<i64>,
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct UnblockIpRequest {
    pub ip: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct HoneypotRequest {
    pub email: String,
    /// 1 to 5. Severity 5 blocks permanently.
    pub severity: i16,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityQuery {
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/admin/blocked-ips",
    responses(
        (status = 200, description = "Blocks still in force", body = [BlockedIp]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub async fn list_blocked(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<BlockedIp>>, Error> {
    require_admin(&headers, &services).await?;
    Ok(Json(services.bot.list_blocked().await?))
}

#[utoipa::path(
    post,
    path = "/admin/block-ip",
    request_body = BlockIpRequest,
    responses(
        (status = 200, description = "Block created or replaced", body = BlockedIp),
        (status = 400, description = "Invalid IP or duration", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub async fn block_ip(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<BlockIpRequest>,
) -> Result<Json<BlockedIp>, Error> {
    let admin = require_admin(&headers, &services).await?;
    let block = services
        .bot
        .block_ip(
            &request.ip,
            request.reason.as_deref().unwrap_or_default(),
            request.duration_hours,
            request.permanent,
        )
        .await?;
    info!("Admin {} blocked {}", admin.email, block.ip);
    Ok(Json(block))
}

#[utoipa::path(
    post,
    path = "/admin/unblock-ip",
    request_body = UnblockIpRequest,
    responses(
        (status = 204, description = "Block removed"),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = crate::error::ErrorBody),
        (status = 404, description = "IP was not blocked", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub async fn unblock_ip(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<UnblockIpRequest>,
) -> Result<StatusCode, Error> {
    let admin = require_admin(&headers, &services).await?;
    services.bot.unblock_ip(&request.ip).await?;
    info!("Admin {} unblocked {}", admin.email, request.ip);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/honeypots",
    request_body = HoneypotRequest,
    responses(
        (status = 200, description = "Honeypot account registered", body = HoneypotAccount),
        (status = 400, description = "Invalid email or severity", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub async fn add_honeypot(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<HoneypotRequest>,
) -> Result<Json<HoneypotAccount>, Error> {
    require_admin(&headers, &services).await?;
    Ok(Json(
        services
            .bot
            .add_honeypot(&request.email, request.severity)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/admin/honeypots/activity",
    params(ActivityQuery),
    responses(
        (status = 200, description = "Most recent honeypot hits", body = [HoneypotActivity]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 403, description = "Caller is not an admin", body = crate::error::ErrorBody),
    ),
    tag = "admin"
)]
pub async fn honeypot_activity(
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<HoneypotActivity>>, Error> {
    require_admin(&headers, &services).await?;
    Ok(Json(
        services
            .bot
            .list_honeypot_activity(query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT))
            .await?,
    ))
}
