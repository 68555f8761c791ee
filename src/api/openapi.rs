use super::handlers::{
    admin, captcha, devices, health, login, notifications, sessions, two_factor,
};
use utoipa::openapi::{
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Handlers sharing a path go into one `routes!` call.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(login::login))
        .routes(routes!(login::login_two_factor))
        .routes(routes!(login::refresh))
        .routes(routes!(captcha::issue))
        .routes(routes!(captcha::verify))
        .routes(routes!(sessions::list_activities))
        .routes(routes!(sessions::deactivate))
        .routes(routes!(two_factor::setup))
        .routes(routes!(two_factor::verify))
        .routes(routes!(two_factor::disable))
        .routes(routes!(two_factor::status))
        .routes(routes!(two_factor::create_challenge))
        .routes(routes!(two_factor::complete_challenge))
        .routes(routes!(
            devices::list_trusted,
            devices::add_trusted,
            devices::remove_trusted
        ))
        .routes(routes!(devices::check))
        .routes(routes!(devices::list_alerts))
        .routes(routes!(devices::confirm))
        .routes(routes!(devices::detect))
        .routes(routes!(
            devices::list_fingerprints,
            devices::record_fingerprint
        ))
        .routes(routes!(notifications::list, notifications::create))
        .routes(routes!(notifications::update))
        .routes(routes!(admin::list_blocked))
        .routes(routes!(admin::block_ip))
        .routes(routes!(admin::unblock_ip))
        .routes(routes!(admin::add_honeypot))
        .routes(routes!(admin::honeypot_activity))
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    let bearer = SecurityScheme::Http(
        HttpBuilder::new()
            .scheme(HttpAuthScheme::Bearer)
            .bearer_format("JWT")
            .build(),
    );

    OpenApiBuilder::new()
        .info(info)
        .tags(Some(vec![
            tag("auth", "Password login, second factor and refresh"),
            tag("sessions", "Active sessions of the signed-in user"),
            tag("two-factor", "TOTP enrollment and challenges"),
            tag("devices", "Trusted devices, fingerprints and unknown-device alerts"),
            tag("notifications", "Notification preferences"),
            tag("captcha", "CAPTCHA challenges"),
            tag("admin", "IP blocks and honeypot accounts"),
            tag("health", "Liveness and readiness"),
        ]))
        .components(Some(
            ComponentsBuilder::new()
                .security_scheme("bearer", bearer)
                .build(),
        ))
        .build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}
