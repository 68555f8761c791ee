use crate::{
    admin::IsAdmin, audit::AuditLog, bot::BotService, credentials::CredentialStore,
    devices::DeviceService, notifications::NotificationService, sessions::SessionService, store::Readiness,
    two_factor::TwoFactorService, verify::SessionVerifier,
};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    Extension, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;
mod proxies;

pub use openapi::openapi;
pub use proxies::TrustedProxies;

/// Everything a handler may reach, constructed once at startup.
pub struct Services {
    pub verifier: SessionVerifier,
    pub sessions: SessionService,
    pub two_factor: TwoFactorService,
    pub devices: DeviceService,
    pub bot: BotService,
    pub notifications: NotificationService,
    pub credentials: Arc<dyn CredentialStore>,
    pub admin: Arc<dyn IsAdmin>,
    pub readiness: Arc<dyn Readiness>,
    pub audit: AuditLog,
    pub trusted_proxies: TrustedProxies,
}

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the full application: documented routes, Swagger UI at `/docs`, request ids,
/// tracing and CORS.
///
/// # Errors
/// Returns an error if `frontend_base_url` is not a valid origin.
pub fn app(services: Arc<Services>, frontend_base_url: Option<&str>) -> Result<Router> {
    let allow_origin = match frontend_base_url {
        Some(url) => AllowOrigin::exact(frontend_origin(url)?),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(allow_origin);

    let (router, openapi) = router().split_for_parts();
    let router = router.merge(SwaggerUi::new("/docs").url("/openapi.json", openapi));
    Ok(router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(services)),
    ))
}

/// Serve `app` until `shutdown` yields.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(
    port: u16,
    app: Router,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.recv().await;
        info!("Gracefully shutdown");
    })
    .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(frontend_base_url: &str) -> Result<HeaderValue> {
    let parsed = Url::parse(frontend_base_url)
        .with_context(|| format!("Invalid frontend base URL: {frontend_base_url}"))?;
    let host = parsed.host_str().ok_or_else(|| {
        anyhow!("Frontend base URL must include a valid host: {frontend_base_url}")
    })?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn frontend_origin_drops_path_and_keeps_port() {
        let origin = frontend_origin("https://app.custodia.dev:8443/login?next=/").unwrap();
        assert_eq!(origin, "https://app.custodia.dev:8443");
    }

    #[test]
    fn frontend_origin_rejects_garbage() {
        assert!(frontend_origin("not a url").is_err());
    }
}
