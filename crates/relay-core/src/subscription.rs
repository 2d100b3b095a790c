//! Subscriptions: a connection's declared interest in one event category.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::SubscriptionId;

/// Closed set of event categories a connection can subscribe to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    /// Generic entity lifecycle updates.
    Entity,
    /// Contact record changes.
    ContactUpdates,
    /// Company record changes.
    CompanyUpdates,
    /// Publication record changes.
    PublicationUpdates,
    /// Progress of bulk import/export jobs.
    BulkJobUpdates,
    /// System-wide notices.
    SystemNotifications,
    /// Conversation thread activity.
    ThreadEvents,
}

impl SubscriptionType {
    /// Every category, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Entity,
        Self::ContactUpdates,
        Self::CompanyUpdates,
        Self::PublicationUpdates,
        Self::BulkJobUpdates,
        Self::SystemNotifications,
        Self::ThreadEvents,
    ];

    /// Wire name of the category.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::ContactUpdates => "contact_updates",
            Self::CompanyUpdates => "company_updates",
            Self::PublicationUpdates => "publication_updates",
            Self::BulkJobUpdates => "bulk_job_updates",
            Self::SystemNotifications => "system_notifications",
            Self::ThreadEvents => "thread_events",
        }
    }
}

impl fmt::Display for SubscriptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown subscription type: {0}")]
pub struct UnknownSubscriptionType(pub String);

impl FromStr for SubscriptionType {
    type Err = UnknownSubscriptionType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownSubscriptionType(s.to_owned()))
    }
}

/// Optional narrowing criteria. An empty set is a wildcard for its dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilters {
    /// Entity identifiers the event must refer to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub entities: BTreeSet<String>,
    /// Event type names the event must carry.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub events: BTreeSet<String>,
    /// Tags of which at least one must appear in the event's `data.tags`.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl SubscriptionFilters {
    /// Filters that match every event of the subscribed category.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to the given entity IDs.
    #[must_use]
    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities.extend(entities.into_iter().map(Into::into));
        self
    }

    /// Restrict to the given event type names.
    #[must_use]
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events.extend(events.into_iter().map(Into::into));
        self
    }

    /// Restrict to events carrying at least one of the given tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Whether every dimension is a wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.entities.is_empty() && self.events.is_empty() && self.tags.is_empty()
    }
}

/// One declared interest, owned by exactly one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique within the owning connection.
    pub id: SubscriptionId,
    /// Category of interest.
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    /// Narrowing criteria.
    #[serde(default)]
    pub filters: SubscriptionFilters,
    /// Creation time (RFC 3339).
    pub created_at: String,
}

impl Subscription {
    /// Create a subscription with a fresh ID.
    pub fn new(subscription_type: SubscriptionType, filters: SubscriptionFilters) -> Self {
        Self {
            id: SubscriptionId::new(),
            subscription_type,
            filters,
            created_at: crate::timestamp(chrono::Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn subscription_type_wire_names() {
        let json = serde_json::to_string(&SubscriptionType::ContactUpdates).unwrap();
        assert_eq!(json, "\"contact_updates\"");
        for t in SubscriptionType::ALL {
            let json = serde_json::to_value(t).unwrap();
            assert_eq!(json.as_str(), Some(t.as_str()));
        }
    }

    #[test]
    fn parse_known_type() {
        assert_eq!(
            "bulk_job_updates".parse::<SubscriptionType>(),
            Ok(SubscriptionType::BulkJobUpdates)
        );
    }

    #[test]
    fn parse_unknown_type_fails() {
        assert_matches!(
            "invoices".parse::<SubscriptionType>(),
            Err(UnknownSubscriptionType(name)) if name == "invoices"
        );
        assert!(serde_json::from_str::<SubscriptionType>("\"invoices\"").is_err());
    }

    #[test]
    fn empty_filters_are_wildcard() {
        assert!(SubscriptionFilters::any().is_wildcard());
        assert!(!SubscriptionFilters::any().with_tags(["press"]).is_wildcard());
    }

    #[test]
    fn absent_filter_fields_deserialize_as_empty() {
        let filters: SubscriptionFilters = serde_json::from_str(r#"{"entities":["e-1"]}"#).unwrap();
        assert_eq!(filters.entities.len(), 1);
        assert!(filters.events.is_empty());
        assert!(filters.tags.is_empty());
    }

    #[test]
    fn empty_filter_fields_are_omitted() {
        let filters = SubscriptionFilters::any().with_events(["updated"]);
        let json = serde_json::to_value(&filters).unwrap();
        assert_eq!(json, serde_json::json!({"events": ["updated"]}));
    }

    #[test]
    fn subscription_serializes_type_field() {
        let sub = Subscription::new(SubscriptionType::Entity, SubscriptionFilters::any());
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["type"], "entity");
        assert!(json["id"].as_str().unwrap().starts_with("sub_"));
        assert!(json["createdAt"].is_string());
    }

    #[test]
    fn subscription_without_filters_deserializes() {
        let sub: Subscription = serde_json::from_str(
            r#"{"id":"sub_1","type":"thread_events","createdAt":"2026-01-01T00:00:00.000Z"}"#,
        )
        .unwrap();
        assert_eq!(sub.subscription_type, SubscriptionType::ThreadEvents);
        assert!(sub.filters.is_wildcard());
    }
}
