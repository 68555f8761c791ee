//! Append-only security event recorder.
//!
//! `AuditLog::add_log` never blocks and never fails: entries are queued on a bounded
//! channel and persisted by a background task. When the queue is full the entry is
//! dropped with a warning. Persistence failures are reported through `tracing` and dropped.

pub mod repo;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clock::Clock;

/// Entries that may wait for the writer before new ones are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

pub use repo::AuditRepo;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    LoginSucceeded,
    LoginFailed,
    SessionIssued,
    SessionRevoked,
    TwoFactorSetupStarted,
    TwoFactorEnabled,
    TwoFactorEnableFailed,
    TwoFactorDisabled,
    TwoFactorChallengeCreated,
    TwoFactorChallengePassed,
    TwoFactorChallengeFailed,
    DeviceTrusted,
    DeviceRemoved,
    UnknownDevice,
    DeviceConfirmed,
    DeviceFingerprintChanged,
    NotificationPreferenceChanged,
    IpBlocked,
    IpUnblocked,
    CaptchaFailed,
    HoneypotTriggered,
    BotPreventionDegraded,
}

impl AuditEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSucceeded => "login_succeeded",
            Self::LoginFailed => "login_failed",
            Self::SessionIssued => "session_issued",
            Self::SessionRevoked => "session_revoked",
            Self::TwoFactorSetupStarted => "two_factor_setup_started",
            Self::TwoFactorEnabled => "two_factor_enabled",
            Self::TwoFactorEnableFailed => "two_factor_enable_failed",
            Self::TwoFactorDisabled => "two_factor_disabled",
            Self::TwoFactorChallengeCreated => "two_factor_challenge_created",
            Self::TwoFactorChallengePassed => "two_factor_challenge_passed",
            Self::TwoFactorChallengeFailed => "two_factor_challenge_failed",
            Self::DeviceTrusted => "device_trusted",
            Self::DeviceRemoved => "device_removed",
            Self::UnknownDevice => "unknown_device",
            Self::DeviceConfirmed => "device_confirmed",
            Self::DeviceFingerprintChanged => "device_fingerprint_changed",
            Self::NotificationPreferenceChanged => "notification_preference_changed",
            Self::IpBlocked => "ip_blocked",
            Self::IpUnblocked => "ip_unblocked",
            Self::CaptchaFailed => "captcha_failed",
            Self::HoneypotTriggered => "honeypot_triggered",
            Self::BotPreventionDegraded => "bot_prevention_degraded",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event: AuditEvent,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

enum Command {
    Append(AuditEntry),
    Flush(oneshot::Sender<()>),
}

/// Handle to the audit writer. Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<Command>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Start the background writer. Must be called inside a tokio runtime.
    #[must_use]
    pub fn spawn(repo: Arc<dyn AuditRepo>, clock: Arc<dyn Clock>) -> Self {
        Self::spawn_with_capacity(repo, clock, DEFAULT_QUEUE_CAPACITY)
    }

    /// Like [`AuditLog::spawn`] with a custom queue size. A zero capacity is raised to one.
    #[must_use]
    pub fn spawn_with_capacity(
        repo: Arc<dyn AuditRepo>,
        clock: Arc<dyn Clock>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Append(entry) => {
                        let span = tracing::info_span!("audit.append", event = entry.event.as_str());
                        if let Err(err) = repo.append(&entry).instrument(span).await {
                            error!(
                                "Failed to persist audit entry {} ({}): {err:#}",
                                entry.id,
                                entry.event.as_str()
                            );
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });

        Self { tx, clock }
    }

    /// Queue an audit entry. Never fails the caller.
    pub fn add_log(&self, event: AuditEvent, content: impl Into<String>, user_id: Option<Uuid>) {
        let entry = AuditEntry {
            id: Uuid::now_v7(),
            user_id,
            event,
            content: content.into(),
            created_at: self.clock.now(),
        };
        match self.tx.try_send(Command::Append(entry)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Audit queue is full; dropping {} entry", event.as_str());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit writer is gone; dropping {} entry", event.as_str());
            }
        }
    }

    /// Wait until every entry queued before this call has been handled.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Command::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}
