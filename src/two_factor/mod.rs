//! TOTP second factor: enrollment, login challenges and recovery codes.
//!
//! State per user moves `disabled -> pending -> enabled`; each login that needs a second
//! factor gets its own short-lived challenge that ends `verified` or `failed`.

pub mod models;
pub mod recovery;
pub mod repo;
pub mod service;

pub use models::{
    ChallengeMethod, ChallengeStatus, CompletedChallenge, SecretSetup, TwoFactorChallenge,
    TwoFactorStateKind, TwoFactorStatus,
};
pub use recovery::RecoveryHasher;
pub use repo::TwoFactorRepo;
pub use service::{TwoFactorConfig, TwoFactorService};
