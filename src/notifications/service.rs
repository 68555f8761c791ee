use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    models::{
        NewPreference, NotificationChannel, NotificationEvent, NotificationPreference,
        PreferenceUpdate,
    },
    repo::NotificationRepo,
};
use crate::{
    audit::{AuditEvent, AuditLog},
    clock::Clock,
    error::Error,
};

pub struct NotificationService {
    repo: Arc<dyn NotificationRepo>,
    clock: Arc<dyn Clock>,
    audit: AuditLog,
}

impl NotificationService {
    #[must_use]
    pub fn new(repo: Arc<dyn NotificationRepo>, clock: Arc<dyn Clock>, audit: AuditLog) -> Self {
        Self { repo, clock, audit }
    }

    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<NotificationPreference>, Error> {
        Ok(self.repo.list_preferences(user_id).await?)
    }

    /// # Errors
    /// Returns `Conflict` if the user already has a preference for the event and channel.
    pub async fn create(
        &self,
        user_id: Uuid,
        request: &NewPreference,
    ) -> Result<NotificationPreference, Error> {
        let now = self.clock.now();
        let preference = NotificationPreference {
            id: Uuid::now_v7(),
            user_id,
            event: request.event,
            channel: request.channel,
            enabled: request.enabled,
            created_at: now,
            updated_at: now,
        };
        if !self.repo.insert_preference(&preference).await? {
            return Err(Error::Conflict(format!(
                "A {} preference for {} already exists",
                request.channel.as_str(),
                request.event.as_str()
            )));
        }
        self.record_change(&preference);
        Ok(preference)
    }

    /// # Errors
    /// Returns `NotFound` unless the preference exists and belongs to the user.
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        update: &PreferenceUpdate,
    ) -> Result<NotificationPreference, Error> {
        let preference = self
            .repo
            .update_preference(id, user_id, update.enabled, self.clock.now())
            .await?
            .ok_or(Error::NotFound)?;
        self.record_change(&preference);
        Ok(preference)
    }

    /// Whether the user wants `event` on `channel`. Users are notified unless they opted out.
    ///
    /// # Errors
    /// Returns `Internal` if the store fails.
    pub async fn should_notify(
        &self,
        user_id: Uuid,
        event: NotificationEvent,
        channel: NotificationChannel,
    ) -> Result<bool, Error> {
        let preference = self.repo.find_preference(user_id, event, channel).await?;
        Ok(preference.map_or(true, |p| p.enabled))
    }

    fn record_change(&self, preference: &NotificationPreference) {
        debug!(
            "Notification preference {} set to {}",
            preference.id, preference.enabled
        );
        self.audit.add_log(
            AuditEvent::NotificationPreferenceChanged,
            format!(
                "{} via {}: {}",
                preference.event.as_str(),
                preference.channel.as_str(),
                if preference.enabled { "on" } else { "off" }
            ),
            Some(preference.user_id),
        );
    }
}
