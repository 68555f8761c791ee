use axum::{
    extract::{ConnectInfo, Extension},
    http::HeaderMap,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::client_ip;
use crate::{
    api::Services,
    bot::{CaptchaKind, IssuedCaptcha},
    error::Error,
};

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct CaptchaRequest {
    #[serde(default)]
    pub kind: CaptchaKind,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CaptchaAnswer {
    pub challenge_id: Uuid,
    pub answer: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CaptchaResult {
    pub success: bool,
}

#[utoipa::path(
    post,
    path = "/captcha",
    request_body = CaptchaRequest,
    responses(
        (status = 200, description = "New challenge", body = IssuedCaptcha),
    ),
    tag = "captcha"
)]
pub async fn issue(
    services: Extension<Arc<Services>>,
    Json(request): Json<CaptchaRequest>,
) -> Result<Json<IssuedCaptcha>, Error> {
    Ok(Json(services.bot.issue_captcha(request.kind).await?))
}

#[utoipa::path(
    post,
    path = "/captcha/verify",
    request_body = CaptchaAnswer,
    responses(
        (status = 200, description = "Whether the answer was correct", body = CaptchaResult),
        (status = 409, description = "Challenge already solved", body = crate::error::ErrorBody),
        (status = 410, description = "Challenge expired or out of attempts", body = crate::error::ErrorBody),
    ),
    tag = "captcha"
)]
pub async fn verify(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<CaptchaAnswer>,
) -> Result<Json<CaptchaResult>, Error> {
    let ip = client_ip(&services.trusted_proxies, &headers, connect_info.as_ref());
    let success = services
        .bot
        .verify_captcha(request.challenge_id, &request.answer, ip.as_deref())
        .await?;
    Ok(Json(CaptchaResult { success }))
}
