//! Error taxonomy shared by every component and its HTTP mapping.
//!
//! Responses always carry `{"error": <kind>, "message": <text>}`. Messages are fixed per
//! kind so a failed second factor or CAPTCHA never reveals which input was wrong.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("captcha required")]
    CaptchaRequired,
    #[error("blocked")]
    Blocked,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("challenge already used")]
    AlreadyUsed,
    #[error("invalid code")]
    InvalidCode,
    #[error("challenge expired")]
    ChallengeExpired,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Structured error payload returned by every failing endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl Error {
    /// Machine-readable kind, stable across releases.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::CaptchaRequired => "captcha_required",
            Self::Blocked => "blocked",
            Self::Conflict(_) => "conflict",
            Self::AlreadyUsed => "already_used",
            Self::InvalidCode => "invalid_code",
            Self::ChallengeExpired => "challenge_expired",
            Self::Internal(_) => "internal",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::InvalidCode => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::Blocked => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited | Self::CaptchaRequired => StatusCode::TOO_MANY_REQUESTS,
            Self::Conflict(_) | Self::AlreadyUsed => StatusCode::CONFLICT,
            Self::ChallengeExpired => StatusCode::GONE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized => "Authentication required".to_string(),
            Self::Forbidden => "Access denied".to_string(),
            Self::InvalidRequest(reason) => reason.clone(),
            Self::NotFound => "Not found".to_string(),
            Self::RateLimited => "Too many requests".to_string(),
            Self::CaptchaRequired => "Captcha required".to_string(),
            Self::Blocked => "Requests from this address are blocked".to_string(),
            Self::Conflict(reason) => reason.clone(),
            Self::AlreadyUsed => "Challenge already used".to_string(),
            Self::InvalidCode => "Invalid verification code".to_string(),
            Self::ChallengeExpired => "Challenge expired".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
        }
    }

    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.kind().to_string(),
            message: self.public_message(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        if let Self::Internal(err) = &self {
            error!("Internal error: {err:#}");
        }
        (self.status(), Json(self.body())).into_response()
    }
}
