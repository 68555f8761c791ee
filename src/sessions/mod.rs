//! Session lifecycle: token groups, access/refresh tokens and activity history.
//!
//! Each group holds exactly one access token and one refresh token. Tokens are never
//! stored in the clear: the store keeps a SHA-256 hash for lookup and a sealed copy bound
//! to the group and token kind.

pub mod models;
pub mod repo;
pub mod service;
pub mod signer;

pub use models::{Activity, IssuedSession, Subject, Token, TokenGroup, TokenKind};
pub use repo::SessionRepo;
pub use service::{SessionConfig, SessionService};
pub use signer::{parse_algorithm, AccessClaims, TokenSigner};
