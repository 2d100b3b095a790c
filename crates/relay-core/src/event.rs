//! Inbound payloads pushed into the hub by the rest of the system.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::subscription::SubscriptionType;

/// An occurrence produced elsewhere that may need to reach subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Tenant the event belongs to.
    pub tenant_id: String,
    /// Entity the event refers to.
    pub entity_id: String,
    /// Event type name (e.g. `"updated"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Category used to select candidate subscriptions.
    pub category: SubscriptionType,
    /// Opaque payload. A `tags` string array is inspected by the matcher.
    #[serde(default)]
    pub data: Value,
}

impl DomainEvent {
    /// Build an event with an empty payload.
    pub fn new(
        tenant_id: impl Into<String>,
        category: SubscriptionType,
        entity_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            entity_id: entity_id.into(),
            event_type: event_type.into(),
            category,
            data: Value::Null,
        }
    }

    /// Replace the payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Tags carried in `data.tags`. Non-string entries are ignored; a missing
    /// or malformed field yields nothing.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.data
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

/// Severity of a tenant notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational.
    #[default]
    Info,
    /// Something completed.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

/// A tenant-wide notice, delivered to every live connection of the tenant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Short headline.
    pub title: String,
    /// Body text.
    pub message: String,
    /// Severity.
    #[serde(default)]
    pub level: NotificationLevel,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Optional link for the client to follow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_url: Option<String>,
}

impl Notification {
    /// An info-level notification without extras.
    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            level: NotificationLevel::Info,
            data: None,
            action_url: None,
        }
    }
}
