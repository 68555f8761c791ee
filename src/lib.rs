//! # Custodia (Session Issuance & Login Abuse Protection)
//!
//! `custodia` issues and validates user sessions for a multi-service platform and
//! guards the login surface against credential stuffing and automated abuse.
//!
//! ## Sessions
//!
//! A login produces a `TokenGroup` that owns exactly one access token (an ECDSA-signed
//! JWT) and one opaque refresh token, plus an `Activity` row that records the session.
//! Revoking a group deletes its tokens and closes the activity in a single transaction.
//!
//! ## Verification
//!
//! Every authenticated request is verified offline: the token is decoded once without
//! trust to learn its issuer, the issuer's ECDSA public key is fetched from the key
//! server, and only then are the claims verified and trusted. Failures always deny.
//!
//! ## Abuse protection
//!
//! - **Bot prevention:** failed-attempt counting, IP blocks, CAPTCHA challenges and
//!   honeypot accounts run before the credential check.
//! - **Device trust:** logins from devices that are not trusted raise an alert with a
//!   risk score and may require a second factor.
//! - **Two-factor:** TOTP with single-use recovery codes.
//! - **Notifications:** users choose which security events they want to hear about and
//!   on which channel. Delivery is not part of this crate.
//!
//! Expiry is evaluated lazily on read everywhere; nothing sweeps rows in the background.

pub mod admin;
pub mod api;
pub mod audit;
pub mod bot;
pub mod cli;
pub mod clock;
pub mod credentials;
pub mod crypto;
pub mod devices;
pub mod error;
pub mod keys;
pub mod notifications;
pub mod sessions;
pub mod store;
pub mod two_factor;
pub mod vault;
pub mod verify;

pub use error::Error;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
