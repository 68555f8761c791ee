//! Password login, second-factor completion and refresh-token rotation.
//!
//! Order on `POST /auth/login`: gate (block / CAPTCHA), honeypot, password, device check,
//! optional second factor, session. Every failure before the session answers with the
//! same `unauthorized` body.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{client_ip, user_agent};
use crate::{
    api::Services,
    audit::AuditEvent,
    bot::{AttemptRecord, GateDecision},
    devices::DeviceInfo,
    error::Error,
    sessions::{IssuedSession, Subject},
};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct CaptchaSolution {
    pub challenge_id: Uuid,
    pub answer: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub device_uid: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    /// Opaque client fingerprint, registered for the user after the password check.
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub captcha: Option<CaptchaSolution>,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct TwoFactorLoginRequest {
    pub challenge_id: Uuid,
    pub code: String,
    #[serde(default)]
    pub device_uid: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub trust_device: bool,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct SessionResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub session_id: Uuid,
}

impl From<IssuedSession> for SessionResponse {
    fn from(issued: IssuedSession) -> Self {
        Self {
            access_token: issued.access_token,
            token_type: "Bearer".to_string(),
            expires_at: issued.access_expires_at,
            refresh_token: issued.refresh_token,
            session_id: issued.activity.session_id,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct TwoFactorRequired {
    pub two_factor_required: bool,
    pub challenge_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

async fn record_failure(
    services: &Services,
    email: &str,
    ip: Option<&str>,
    device_uid: Option<&str>,
) {
    services
        .bot
        .record_attempt(AttemptRecord {
            email: email.to_string(),
            ip: ip.map(str::to_string),
            device_uid: device_uid.map(str::to_string),
            ..AttemptRecord::default()
        })
        .await;
    services.audit.add_log(
        AuditEvent::LoginFailed,
        format!("email {email} ip {}", ip.unwrap_or("unknown")),
        None,
    );
}

/// A rejected second factor counts towards the address's failure budget like a wrong password.
async fn record_second_factor_failure(
    services: &Services,
    challenge_id: Uuid,
    ip: Option<&str>,
    device_uid: Option<&str>,
) {
    let user = match services.two_factor.challenge_owner(challenge_id).await {
        Ok(Some(user_id)) => services.credentials.find_user(user_id).await.ok().flatten(),
        Ok(None) => None,
        Err(err) => {
            warn!("Failed to look up two-factor challenge {challenge_id}: {err}");
            None
        }
    };
    services
        .bot
        .record_attempt(AttemptRecord {
            email: user.as_ref().map(|u| u.email.clone()).unwrap_or_default(),
            ip: ip.map(str::to_string),
            device_uid: device_uid.map(str::to_string),
            user_id: user.as_ref().map(|u| u.user_id),
            ..AttemptRecord::default()
        })
        .await;
}

/// Issue the session and record the successful attempt.
async fn complete_login(
    services: &Services,
    subject: &Subject,
    device: &DeviceInfo,
    risk_score: Option<i32>,
) -> Result<SessionResponse, Error> {
    let issued = services.sessions.issue(subject, device).await?;
    services
        .bot
        .record_attempt(AttemptRecord {
            email: subject.email.clone(),
            ip: device.ip.clone(),
            device_uid: device.device_uid.clone(),
            user_id: Some(subject.user_id),
            success: true,
            risk_score,
        })
        .await;
    services.audit.add_log(
        AuditEvent::LoginSucceeded,
        format!("session {}", issued.activity.session_id),
        Some(subject.user_id),
    );
    info!("User {} signed in", subject.user_id);
    Ok(issued.into())
}

/// A correct CAPTCHA answer lifts `CaptchaRequired` for this request only.
async fn captcha_solved(
    services: &Services,
    solution: Option<&CaptchaSolution>,
    ip: Option<&str>,
) -> Result<bool, Error> {
    let Some(solution) = solution else {
        return Ok(false);
    };
    match services
        .bot
        .verify_captcha(solution.challenge_id, &solution.answer, ip)
        .await
    {
        Ok(solved) => Ok(solved),
        Err(Error::Internal(err)) => Err(Error::Internal(err)),
        Err(err) => {
            debug!("Captcha rejected during login: {err}");
            Ok(false)
        }
    }
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 202, description = "Second factor required", body = TwoFactorRequired),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody),
        (status = 403, description = "Address blocked", body = crate::error::ErrorBody),
        (status = 429, description = "CAPTCHA required", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<LoginRequest>,
) -> Result<Response, Error> {
    let ip = client_ip(&services.trusted_proxies, &headers, connect_info.as_ref());
    let agent = user_agent(&headers);
    let email = request.email.trim();

    match services.bot.login_gate(ip.as_deref()).await {
        GateDecision::Allowed => {}
        GateDecision::Blocked => return Err(Error::Blocked),
        GateDecision::CaptchaRequired => {
            if !captcha_solved(&services, request.captcha.as_ref(), ip.as_deref()).await? {
                return Err(Error::CaptchaRequired);
            }
        }
    }

    if services
        .bot
        .check_honeypot(email, ip.as_deref(), agent.as_deref())
        .await
        .is_some()
    {
        record_failure(&services, email, ip.as_deref(), request.device_uid.as_deref()).await;
        return Err(Error::Unauthorized);
    }

    let Some(user) = services
        .credentials
        .verify_password(email, &request.password)
        .await?
    else {
        record_failure(&services, email, ip.as_deref(), request.device_uid.as_deref()).await;
        return Err(Error::Unauthorized);
    };

    let device = DeviceInfo {
        device_uid: request.device_uid,
        name: request.device_name,
        ip,
        user_agent: agent,
        location: request.location,
    };

    let detection = if device.device_uid.is_some() {
        Some(services.devices.detect_unknown(user.user_id, &device).await?)
    } else {
        None
    };
    let fingerprint_moved = match request
        .fingerprint
        .as_deref()
        .filter(|fp| !fp.trim().is_empty())
    {
        Some(fingerprint) => match services
            .devices
            .record_fingerprint(user.user_id, &device, fingerprint)
            .await
        {
            Ok(found) => found.device_changed,
            Err(err) => {
                warn!("Ignoring fingerprint from {}: {err}", user.user_id);
                false
            }
        },
        None => false,
    };
    // Without a device id the device cannot be recognised, so it counts as unknown. A
    // fingerprint that shows up under a new device id does too.
    let unknown = fingerprint_moved || detection.as_ref().map_or(true, |d| d.unknown);

    if unknown && services.two_factor.is_enabled(user.user_id).await? {
        let challenge = services
            .two_factor
            .create_challenge(user.user_id, device.ip.clone(), device.user_agent.clone())
            .await?;
        debug!("Second factor required for {}", user.user_id);
        return Ok((
            StatusCode::ACCEPTED,
            Json(TwoFactorRequired {
                two_factor_required: true,
                challenge_id: challenge.id,
                expires_at: challenge.expires_at,
            }),
        )
            .into_response());
    }

    let subject = Subject {
        user_id: user.user_id,
        email: user.email,
    };
    let risk_score = detection.as_ref().and_then(|d| d.risk_score());
    let session = complete_login(&services, &subject, &device, risk_score).await?;
    Ok(Json(session).into_response())
}

#[utoipa::path(
    post,
    path = "/auth/login/two-factor",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionResponse),
        (status = 401, description = "Wrong code or unknown challenge", body = crate::error::ErrorBody),
        (status = 403, description = "Address blocked", body = crate::error::ErrorBody),
        (status = 410, description = "Challenge expired, exhausted or already used", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login_two_factor(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<TwoFactorLoginRequest>,
) -> Result<Json<SessionResponse>, Error> {
    let ip = client_ip(&services.trusted_proxies, &headers, connect_info.as_ref());
    let agent = user_agent(&headers);

    if let Some(ip) = ip.as_deref() {
        if services.bot.is_blocked(ip).await {
            return Err(Error::Blocked);
        }
    }

    let completed = match services
        .two_factor
        .complete_challenge(
            request.challenge_id,
            &request.code,
            ip.as_deref(),
            agent.as_deref(),
        )
        .await
    {
        Ok(completed) => completed,
        Err(err @ (Error::InvalidCode | Error::ChallengeExpired)) => {
            record_second_factor_failure(
                &services,
                request.challenge_id,
                ip.as_deref(),
                request.device_uid.as_deref(),
            )
            .await;
            return Err(err);
        }
        Err(err) => return Err(err),
    };

    let Some(user) = services.credentials.find_user(completed.user_id).await? else {
        return Err(Error::Unauthorized);
    };

    let device = DeviceInfo {
        device_uid: request.device_uid,
        name: request.device_name,
        ip,
        user_agent: agent,
        location: None,
    };
    if request.trust_device && device.device_uid.is_some() {
        services.devices.add_trusted(user.user_id, &device).await?;
    }

    let subject = Subject {
        user_id: user.user_id,
        email: user.email,
    };
    Ok(Json(complete_login(&services, &subject, &device, None).await?))
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Rotated session", body = SessionResponse),
        (status = 401, description = "Unknown, expired or already used refresh token", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    services: Extension<Arc<Services>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<SessionResponse>, Error> {
    let group = services.sessions.redeem_refresh(&request.refresh_token).await?;
    let Some(user) = services.credentials.find_user(group.user_id).await? else {
        return Err(Error::Unauthorized);
    };

    let device = DeviceInfo {
        device_uid: group.device_uid,
        ip: client_ip(&services.trusted_proxies, &headers, connect_info.as_ref()),
        user_agent: user_agent(&headers),
        ..DeviceInfo::default()
    };
    let issued = services
        .sessions
        .issue(
            &Subject {
                user_id: user.user_id,
                email: user.email,
            },
            &device,
        )
        .await?;
    Ok(Json(issued.into()))
}
