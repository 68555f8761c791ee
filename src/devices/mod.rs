//! Trusted devices, the fingerprint registry and unknown-device anomaly alerts.

pub mod models;
pub mod repo;
pub mod risk;
pub mod service;

pub use models::{
    AlertAction, ConfirmedBy, Detection, DeviceFingerprint, DeviceInfo, FingerprintMatch,
    TrustedDevice, UnknownDeviceAlert,
};
pub use repo::{AttemptHistory, DeviceRepo};
pub use risk::{RiskScorer, RiskSignals, RuleBasedScorer};
pub use service::{DeviceConfig, DeviceService};
