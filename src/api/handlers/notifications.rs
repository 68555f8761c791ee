//! Notification preferences of the signed-in user.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::principal::require_identity;
use crate::{
    api::Services,
    error::Error,
    notifications::{NewPreference, NotificationPreference, PreferenceUpdate},
};

#[utoipa::path(
    get,
    path = "/notifications",
    responses(
        (status = 200, description = "Preferences of the caller, oldest first", body = [NotificationPreference]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "notifications"
)]
pub async fn list(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<NotificationPreference>>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.notifications.list(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/notifications",
    request_body = NewPreference,
    responses(
        (status = 201, description = "Preference created", body = NotificationPreference),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 409, description = "Preference for this event and channel exists", body = crate::error::ErrorBody),
    ),
    tag = "notifications"
)]
pub async fn create(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<NewPreference>,
) -> Result<(StatusCode, Json<NotificationPreference>), Error> {
    let identity = require_identity(&headers, &services).await?;
    let preference = services
        .notifications
        .create(identity.user_id, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(preference)))
}

#[utoipa::path(
    put,
    path = "/notifications/{id}",
    params(("id" = String, Path, description = "Preference id")),
    request_body = PreferenceUpdate,
    responses(
        (status = 200, description = "Preference updated", body = NotificationPreference),
        (status = 400, description = "Malformed id", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 404, description = "No such preference for the caller", body = crate::error::ErrorBody),
    ),
    tag = "notifications"
)]
pub async fn update(
    Path(id): Path<String>,
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(update): Json<PreferenceUpdate>,
) -> Result<Json<NotificationPreference>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let id = Uuid::parse_str(&id)
        .map_err(|_| Error::InvalidRequest("Preference id must be a UUID".to_string()))?;
    Ok(Json(
        services
            .notifications
            .update(identity.user_id, id, &update)
            .await?,
    ))
}
