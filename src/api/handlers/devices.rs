//! Trusted devices, fingerprints and unknown-device alerts for the signed-in user.

use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{client_ip, principal::require_identity, user_agent};
use crate::{
    api::Services,
    devices::{
        ConfirmedBy, Detection, DeviceFingerprint, DeviceInfo, FingerprintMatch, TrustedDevice,
        UnknownDeviceAlert,
    },
    error::Error,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeviceQuery {
    pub device_uid: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct TrustedCheck {
    pub trusted: bool,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct FingerprintRequest {
    pub fingerprint: String,
    #[serde(default)]
    pub device_uid: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ConfirmRequest {
    pub alert_id: Uuid,
    pub is_trusted: bool,
}

/// Fill in request metadata. The observed address replaces whatever the client claimed.
fn with_request_context(
    mut device: DeviceInfo,
    services: &Services,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> DeviceInfo {
    if let Some(ip) = client_ip(&services.trusted_proxies, headers, connect_info) {
        device.ip = Some(ip);
    }
    if device.user_agent.is_none() {
        device.user_agent = user_agent(headers);
    }
    device
}

#[utoipa::path(
    get,
    path = "/trusted-devices",
    responses(
        (status = 200, description = "Unexpired trusted devices", body = [TrustedDevice]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn list_trusted(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<TrustedDevice>>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.devices.list_trusted(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/trusted-devices",
    request_body = DeviceInfo,
    responses(
        (status = 201, description = "Device trusted", body = TrustedDevice),
        (status = 400, description = "Missing device_uid", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn add_trusted(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(device): Json<DeviceInfo>,
) -> Result<(StatusCode, Json<TrustedDevice>), Error> {
    let identity = require_identity(&headers, &services).await?;
    let device = with_request_context(device, &services, &headers, connect_info.as_ref());
    let trusted = services
        .devices
        .add_trusted(identity.user_id, &device)
        .await?;
    Ok((StatusCode::CREATED, Json(trusted)))
}

#[utoipa::path(
    delete,
    path = "/trusted-devices",
    params(DeviceQuery),
    responses(
        (status = 204, description = "Device removed"),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 404, description = "Device was not trusted", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn remove_trusted(
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
    services: Extension<Arc<Services>>,
) -> Result<StatusCode, Error> {
    let identity = require_identity(&headers, &services).await?;
    services
        .devices
        .remove_trusted(identity.user_id, &query.device_uid)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/trusted-devices/check",
    params(DeviceQuery),
    responses(
        (status = 200, description = "Whether the device is currently trusted", body = TrustedCheck),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn check(
    headers: HeaderMap,
    Query(query): Query<DeviceQuery>,
    services: Extension<Arc<Services>>,
) -> Result<Json<TrustedCheck>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let trusted = services
        .devices
        .is_trusted(identity.user_id, &query.device_uid)
        .await?;
    Ok(Json(TrustedCheck { trusted }))
}

#[utoipa::path(
    get,
    path = "/trusted-devices/alerts",
    responses(
        (status = 200, description = "Unknown-device alerts, newest first", body = [UnknownDeviceAlert]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn list_alerts(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<UnknownDeviceAlert>>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.devices.list_alerts(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/trusted-devices/confirm",
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Alert resolved, or unchanged if already resolved", body = UnknownDeviceAlert),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
        (status = 404, description = "Alert not found for the caller", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn confirm(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<UnknownDeviceAlert>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let alert = services
        .devices
        .confirm_device(
            request.alert_id,
            identity.user_id,
            request.is_trusted,
            ConfirmedBy::User,
        )
        .await?;
    Ok(Json(alert))
}

#[utoipa::path(
    post,
    path = "/trusted-devices/detect",
    request_body = DeviceInfo,
    responses(
        (status = 200, description = "Detection result with the alert raised, if any", body = Detection),
        (status = 400, description = "Missing device_uid", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn detect(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(device): Json<DeviceInfo>,
) -> Result<Json<Detection>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let device = with_request_context(device, &services, &headers, connect_info.as_ref());
    Ok(Json(
        services
            .devices
            .detect_unknown(identity.user_id, &device)
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/trusted-devices/fingerprints",
    responses(
        (status = 200, description = "Fingerprints seen for the caller, most recent first", body = [DeviceFingerprint]),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn list_fingerprints(
    headers: HeaderMap,
    services: Extension<Arc<Services>>,
) -> Result<Json<Vec<DeviceFingerprint>>, Error> {
    let identity = require_identity(&headers, &services).await?;
    Ok(Json(services.devices.list_fingerprints(identity.user_id).await?))
}

#[utoipa::path(
    post,
    path = "/trusted-devices/fingerprints",
    request_body = FingerprintRequest,
    responses(
        (status = 200, description = "Fingerprint registered", body = FingerprintMatch),
        (status = 400, description = "Blank or oversized fingerprint", body = crate::error::ErrorBody),
        (status = 401, description = "Missing or invalid bearer token", body = crate::error::ErrorBody),
    ),
    tag = "devices"
)]
pub async fn record_fingerprint(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<FingerprintRequest>,
) -> Result<Json<FingerprintMatch>, Error> {
    let identity = require_identity(&headers, &services).await?;
    let device = with_request_context(
        DeviceInfo {
            device_uid: request.device_uid,
            ..DeviceInfo::default()
        },
        &services,
        &headers,
        connect_info.as_ref(),
    );
    Ok(Json(
        services
            .devices
            .record_fingerprint(identity.user_id, &device, &request.fingerprint)
            .await?,
    ))
}
