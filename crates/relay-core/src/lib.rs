//! # relay-core
//!
//! Foundation types shared by every Relay crate:
//!
//! - **Branded IDs**: `SubscriptionId`, `MessageId`, `LogEntryId` as prefixed newtypes
//! - **Connections**: durable `ConnectionRecord` shape and status
//! - **Subscriptions**: closed `SubscriptionType` category space and conjunctive filters
//! - **Events and messages**: inbound `DomainEvent`, outbound `OutboundMessage` wire format
//! - **Record store**: the `RecordStore` contract plus a process-local implementation
//! - **Logging**: `tracing` subscriber setup and in-memory capture for tests

#![deny(unsafe_code)]

pub mod connection;
pub mod event;
pub mod ids;
pub mod logging;
pub mod message;
pub mod store;
pub mod subscription;

pub use connection::{ConnectionMeta, ConnectionRecord, ConnectionStatus};
pub use event::{DomainEvent, Notification, NotificationLevel};
pub use ids::{LogEntryId, MessageId, SubscriptionId};
pub use message::{MessagePayload, OutboundMessage};
pub use store::{MemoryRecordStore, MessageLogEntry, RecordStore, StoreError};
pub use subscription::{Subscription, SubscriptionFilters, SubscriptionType};

/// Current UTC time formatted the way every Relay timestamp is stored.
///
/// RFC 3339 with millisecond precision and a `Z` suffix, so string comparison
/// orders timestamps chronologically.
pub fn timestamp(at: chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
