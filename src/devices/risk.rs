//! Pluggable risk scoring for logins from untrusted devices.

use super::models::TrustedDevice;

/// Signals gathered for one login from an untrusted device.
#[derive(Clone, Debug, Default)]
pub struct RiskSignals<'a> {
    pub ip: Option<&'a str>,
    pub location: Option<&'a str>,
    /// The user's other unexpired trusted devices.
    pub trusted: &'a [TrustedDevice],
    /// Alerts the user already blocked that came from `ip`, on any device.
    pub previously_blocked: i64,
    /// Failed logins from `ip` in the last hour.
    pub recent_failures: i64,
}

pub trait RiskScorer: Send + Sync {
    /// Score in `0..=100`; higher is more suspicious.
    fn score(&self, signals: &RiskSignals<'_>) -> i32;
}

/// Flat additive rule over the signals above.
#[derive(Clone, Copy, Debug, Default)]
pub struct RuleBasedScorer;

const BASE: i32 = 30;
const HAS_OTHER_TRUSTED: i32 = 20;
const PREVIOUSLY_BLOCKED: i32 = 25;
const NEW_IP: i32 = 10;
const NEW_LOCATION: i32 = 15;
const PER_FAILURE: i32 = 5;
const MAX_FAILURE_POINTS: i32 = 20;

impl RiskScorer for RuleBasedScorer {
    fn score(&self, signals: &RiskSignals<'_>) -> i32 {
        let mut score = BASE;

        if !signals.trusted.is_empty() {
            score += HAS_OTHER_TRUSTED;
        }
        if signals.previously_blocked > 0 {
            score += PREVIOUSLY_BLOCKED;
        }
        if let Some(ip) = signals.ip {
            if !signals
                .trusted
                .iter()
                .any(|d| d.last_ip.as_deref() == Some(ip))
            {
                score += NEW_IP;
            }
        }
        if let Some(location) = signals.location {
            if !signals
                .trusted
                .iter()
                .any(|d| d.last_location.as_deref() == Some(location))
            {
                score += NEW_LOCATION;
            }
        }

        let failures = i32::try_from(signals.recent_failures.max(0)).unwrap_or(i32::MAX);
        score += failures.saturating_mul(PER_FAILURE).min(MAX_FAILURE_POINTS);

        score.clamp(0, 100)
    }
}
