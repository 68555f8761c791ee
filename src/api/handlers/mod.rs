pub mod admin;
pub mod captcha;
pub mod devices;
pub mod health;
pub mod login;
pub mod notifications;
pub mod principal;
pub mod sessions;
pub mod two_factor;

#[cfg(test)]
mod test_support;
#[cfg(test)]
mod tests;

use super::TrustedProxies;
use axum::{extract::ConnectInfo, http::HeaderMap};
use std::net::SocketAddr;

/// Client address as seen through the configured trusted proxies.
pub(crate) fn client_ip(
    proxies: &TrustedProxies,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> Option<String> {
    proxies.client_ip(headers, connect_info)
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
