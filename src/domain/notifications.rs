//! Notification domain types
//!
//! In-app notifications and per-user delivery preferences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Notification type enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ProjectApplication,
    ApplicationAccepted,
    ApplicationRejected,
    ProjectCompleted,
    ProjectUpdate,
    NewMessage,
    ReviewReceived,
    PaymentReminder,
    System,
}

string_enum!(NotificationType);

impl From<String> for NotificationType {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(NotificationType::System)
    }
}

/// Notification entity
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub related_type: Option<String>,
    pub related_id: Option<Uuid>,
    pub extra_data: sqlx::types::Json<serde_json::Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A notification about to be created
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub related: Option<(String, Uuid)>,
    pub extra_data: serde_json::Value,
}

impl NewNotification {
    pub fn new(
        user_id: Uuid,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            notification_type,
            title: title.into(),
            message: message.into(),
            related: None,
            extra_data: serde_json::json!({}),
        }
    }

    pub fn related_to(mut self, kind: &str, id: Uuid) -> Self {
        self.related = Some((kind.to_string(), id));
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.extra_data = data;
        self
    }
}

/// Query params for listing notifications
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationQuery {
    #[serde(default)]
    pub notification_type: Option<NotificationType>,
    #[serde(default)]
    pub is_read: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationIdsRequest {
    pub notification_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationStats {
    pub total: i64,
    pub unread: i64,
    pub by_type: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryChannel {
    Email,
    Push,
    InApp,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct NotificationPreference {
    #[serde(skip)]
    pub user_id: Uuid,
    pub email_project_updates: bool,
    pub email_new_messages: bool,
    pub email_applications: bool,
    pub email_reviews: bool,
    pub email_marketing: bool,
    pub push_project_updates: bool,
    pub push_new_messages: bool,
    pub push_applications: bool,
    pub push_reviews: bool,
    pub inapp_project_updates: bool,
    pub inapp_new_messages: bool,
    pub inapp_applications: bool,
    pub inapp_reviews: bool,
}

impl NotificationPreference {
    pub fn defaults_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            email_project_updates: true,
            email_new_messages: true,
            email_applications: true,
            email_reviews: true,
            email_marketing: true,
            push_project_updates: true,
            push_new_messages: true,
            push_applications: true,
            push_reviews: true,
            inapp_project_updates: true,
            inapp_new_messages: true,
            inapp_applications: true,
            inapp_reviews: true,
        }
    }

    /// Whether a notification of `kind` goes out on `channel`. System
    /// notifications always do.
    pub fn allows(&self, channel: DeliveryChannel, kind: NotificationType) -> bool {
        use NotificationType::*;

        let (updates, messages, applications, reviews) = match channel {
            DeliveryChannel::Email => (
                self.email_project_updates,
                self.email_new_messages,
                self.email_applications,
                self.email_reviews,
            ),
            DeliveryChannel::Push => (
                self.push_project_updates,
                self.push_new_messages,
                self.push_applications,
                self.push_reviews,
            ),
            DeliveryChannel::InApp => (
                self.inapp_project_updates,
                self.inapp_new_messages,
                self.inapp_applications,
                self.inapp_reviews,
            ),
        };

        match kind {
            ProjectApplication | ApplicationAccepted | ApplicationRejected => applications,
            ProjectCompleted | ProjectUpdate | PaymentReminder => updates,
            NewMessage => messages,
            ReviewReceived => reviews,
            System => true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdatePreferencesRequest {
    pub email_project_updates: Option<bool>,
    pub email_new_messages: Option<bool>,
    pub email_applications: Option<bool>,
    pub email_reviews: Option<bool>,
    pub email_marketing: Option<bool>,
    pub push_project_updates: Option<bool>,
    pub push_new_messages: Option<bool>,
    pub push_applications: Option<bool>,
    pub push_reviews: Option<bool>,
    pub inapp_project_updates: Option<bool>,
    pub inapp_new_messages: Option<bool>,
    pub inapp_applications: Option<bool>,
    pub inapp_reviews: Option<bool>,
}

impl UpdatePreferencesRequest {
    pub fn apply(self, prefs: &mut NotificationPreference) {
        macro_rules! merge {
            ($($field:ident),+) => {
                $(if let Some(v) = self.$field { prefs.$field = v; })+
            };
        }
        merge!(
            email_project_updates,
            email_new_messages,
            email_applications,
            email_reviews,
            email_marketing,
            push_project_updates,
            push_new_messages,
            push_applications,
            push_reviews,
            inapp_project_updates,
            inapp_new_messages,
            inapp_applications,
            inapp_reviews
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_mapping_per_type() {
        let mut prefs = NotificationPreference::defaults_for(Uuid::new_v4());
        prefs.email_applications = false;
        prefs.push_new_messages = false;

        assert!(!prefs.allows(DeliveryChannel::Email, NotificationType::ProjectApplication));
        assert!(!prefs.allows(DeliveryChannel::Email, NotificationType::ApplicationRejected));
        assert!(prefs.allows(DeliveryChannel::Push, NotificationType::ApplicationAccepted));
        assert!(!prefs.allows(DeliveryChannel::Push, NotificationType::NewMessage));
        assert!(prefs.allows(DeliveryChannel::Email, NotificationType::PaymentReminder));
    }

    #[test]
    fn system_notifications_ignore_preferences() {
        let mut prefs = NotificationPreference::defaults_for(Uuid::new_v4());
        prefs.email_project_updates = false;
        prefs.email_new_messages = false;
        prefs.email_applications = false;
        prefs.email_reviews = false;
        assert!(prefs.allows(DeliveryChannel::Email, NotificationType::System));
    }

    #[test]
    fn partial_preference_update() {
        let mut prefs = NotificationPreference::defaults_for(Uuid::new_v4());
        UpdatePreferencesRequest {
            email_marketing: Some(false),
            push_reviews: Some(false),
            ..Default::default()
        }
        .apply(&mut prefs);
        assert!(!prefs.email_marketing);
        assert!(!prefs.push_reviews);
        assert!(prefs.push_applications);
    }

    #[test]
    fn unknown_type_text_maps_to_system() {
        assert_eq!(
            NotificationType::from("review_received".to_string()),
            NotificationType::ReviewReceived
        );
        assert_eq!(NotificationType::from("nope".to_string()), NotificationType::System);
    }
}
