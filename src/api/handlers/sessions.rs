//! Remote session management for the signed-in user.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use super::principal::require_identity;
use crate::{api::Services, error::Error, sessions::Activity};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct DeactivateRequest {
    pub session_id: Uuid,
}

#[utoipa::path(
    get,
    path = "/remote-auth/activities",
    responses(
        (status = 200, description = "Active sessions, newest first", body = [Activity]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "sessions"
)]
pub async fn list_activities(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<Activity>>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.sessions.list_active(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/remote-auth/deactivate",
    request_body = DeactivateRequest,
    responses(
        (status = 204, description = "Session closed and its tokens revoked"),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 404, description = "No active session with this id for the caller", body = crate::error::ErrorBody),
    ),
    tag = "sessions"
)]
pub async fn deactivate(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<DeactivateRequest>,
) -> Result<StatusCode, Error> {
    let identity = require_identity(&headers, &services).await?;
    services
        .sessions
        .deactivate(request.session_id, identity.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
