//! HTTP responder for `GET /public-key?issuer=<iss>`.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;
use utoipa::IntoParams;

use super::{validate_public_key_pem, PublicKeyResponse};
use crate::{error::Error, GIT_COMMIT_HASH};

/// The single active key. Rotation means a restart.
#[derive(Debug)]
pub struct KeyServerState {
    public_key_pem: String,
}

impl KeyServerState {
    /// # Errors
    /// Returns an error if `public_key_pem` is not an EC public key.
    pub fn new(public_key_pem: String) -> anyhow::Result<Self> {
        validate_public_key_pem(&public_key_pem)?;
        Ok(Self { public_key_pem })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct IssuerQuery {
    /// Issuer named in the token being verified.
    pub issuer: Option<String>,
}

#[utoipa::path(
    get,
    path = "/public-key",
    params(IssuerQuery),
    responses(
        (status = 200, description = "Current verification key", body = PublicKeyResponse),
        (status = 400, description = "Missing issuer", body = crate::error::ErrorBody),
    ),
    tag = "keys"
)]
pub async fn public_key(
    Query(query): Query<IssuerQuery>,
    state: Extension<Arc<KeyServerState>>,
) -> Result<Json<PublicKeyResponse>, Error> {
    let Some(issuer) = query.issuer.as_deref().map(str::trim).filter(|i| !i.is_empty()) else {
        return Err(Error::InvalidRequest("issuer is required".to_string()));
    };
    debug!("Serving public key for issuer {issuer}");
    Ok(Json(PublicKeyResponse {
        public_key: state.public_key_pem.clone(),
    }))
}

async fn health() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    let app = format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        GIT_COMMIT_HASH
    );
    if let Ok(value) = HeaderValue::from_str(&app) {
        headers.insert("X-App", value);
    }
    (StatusCode::OK, headers)
}

/// Routes served by `custodia keyserver`.
pub fn router(state: Arc<KeyServerState>) -> Router {
    Router::new()
        .route("/public-key", get(public_key))
        .route("/health", get(health))
        .layer(Extension(state))
}
