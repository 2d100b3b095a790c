//! Subscription matching.
//!
//! [`evaluate`] is the pure predicate, checked in a fixed order so the first
//! failing rule is reported. [`matching_connections`] applies it across the
//! event tenant's live connections only.

use std::sync::Arc;

use relay_core::{DomainEvent, Subscription};

use crate::connection::LiveConnection;
use crate::registry::Registry;

/// Why a subscription did not accept an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Subscription type differs from the event category.
    CategoryMismatch,
    /// Owning connection belongs to another tenant.
    TenantMismatch,
    /// Entity filter set and the event's entity is not in it.
    EntityFiltered,
    /// Event-type filter set and the event's type is not in it.
    EventTypeFiltered,
    /// Tag filter set and no event tag is in it.
    TagFiltered,
}

/// Check `subscription`, owned by a connection of `owner_tenant`, against `event`.
///
/// Returns `None` on a match.
pub fn evaluate(
    owner_tenant: &str,
    subscription: &Subscription,
    event: &DomainEvent,
) -> Option<Rejection> {
    let filters = &subscription.filters;
    if subscription.subscription_type != event.category {
        return Some(Rejection::CategoryMismatch);
    }
    if owner_tenant != event.tenant_id {
        return Some(Rejection::TenantMismatch);
    }
    if !filters.entities.is_empty() && !filters.entities.contains(&event.entity_id) {
        return Some(Rejection::EntityFiltered);
    }
    if !filters.events.is_empty() && !filters.events.contains(&event.event_type) {
        return Some(Rejection::EventTypeFiltered);
    }
    if !filters.tags.is_empty() && !event.tags().any(|t| filters.tags.contains(t)) {
        return Some(Rejection::TagFiltered);
    }
    None
}

/// Whether `subscription` accepts `event`.
pub fn matches(owner_tenant: &str, subscription: &Subscription, event: &DomainEvent) -> bool {
    evaluate(owner_tenant, subscription, event).is_none()
}

/// Whether any of `conn`'s subscriptions accepts `event`. Stops at the first hit.
pub fn connection_matches(conn: &LiveConnection, event: &DomainEvent) -> bool {
    conn.with_subscriptions(|subs| subs.iter().any(|s| matches(&conn.tenant_id, s, event)))
}

/// Live connections of the event's tenant with at least one accepting
/// subscription. Each connection appears at most once, ordered by ID.
pub fn matching_connections(registry: &Registry, event: &DomainEvent) -> Vec<Arc<LiveConnection>> {
    registry
        .tenant_connections(&event.tenant_id)
        .into_iter()
        .filter(|conn| connection_matches(conn, event))
        .collect()
}

/// IDs of [`matching_connections`].
pub fn find_matching_connections(registry: &Registry, event: &DomainEvent) -> Vec<String> {
    matching_connections(registry, event)
        .into_iter()
        .map(|c| c.id.clone())
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
