//! Per-user notification preferences.
//!
//! Only the opt-in state lives here. Sending anything is left to whoever consumes
//! [`NotificationService::should_notify`].

pub mod models;
pub mod repo;
pub mod service;

pub use models::{
    NewPreference, NotificationChannel, NotificationEvent, NotificationPreference,
    PreferenceUpdate,
};
pub use repo::NotificationRepo;
pub use service::NotificationService;
