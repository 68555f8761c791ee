//! Login abuse protection: attempt tracking, IP blocks, CAPTCHA and honeypot accounts.
//!
//! Counter reads on the login path fail open. Every degraded decision is logged and
//! audited as `bot_prevention_degraded`.

pub mod captcha;
pub mod honeypot;
pub mod models;
pub mod repo;
pub mod service;

pub use honeypot::HoneypotPolicy;
pub use models::{
    permanent_block_sentinel, BlockedIp, CaptchaKind, GateDecision, HoneypotAccount,
    HoneypotActivity, IssuedCaptcha,
};
pub use repo::BotRepo;
pub use service::{AttemptRecord, BotConfig, BotService};
