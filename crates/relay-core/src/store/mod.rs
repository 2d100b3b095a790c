//! Durable record store contract.
//!
//! The hub mirrors connection state and every delivered message into a
//! [`RecordStore`]. The in-memory registry stays authoritative for routing;
//! the store exists for audit, recovery, and the retention sweeps.
//!
//! Implementations assign all timestamps themselves (server time).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::{ConnectionRecord, ConnectionStatus};
use crate::ids::LogEntryId;
use crate::message::OutboundMessage;
use crate::subscription::Subscription;

pub use memory::MemoryRecordStore;

/// Errors surfaced by a record store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend-specific failure (database, pool, I/O).
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The store cannot currently accept requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

/// Convenience alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// One mirrored delivery, kept for replay/audit until the retention window expires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLogEntry {
    /// Entry ID.
    pub id: LogEntryId,
    /// Tenant of the receiving connection.
    pub tenant_id: String,
    /// Receiving connection.
    pub connection_id: String,
    /// Owning principal of the receiving connection.
    pub user_id: String,
    /// ID of the mirrored message.
    pub message_id: String,
    /// Message kind (`event`, `notification`, `ping`, `pong`).
    pub kind: String,
    /// Full serialized message.
    pub payload: serde_json::Value,
    /// When the entry was written (RFC 3339). Assigned by the store.
    pub created_at: String,
}

impl MessageLogEntry {
    /// Build an entry for a message sent to a connection.
    pub fn for_message(
        tenant_id: &str,
        connection_id: &str,
        user_id: &str,
        message: &OutboundMessage,
    ) -> Result<Self> {
        Ok(Self {
            id: LogEntryId::new(),
            tenant_id: tenant_id.to_owned(),
            connection_id: connection_id.to_owned(),
            user_id: user_id.to_owned(),
            message_id: message.id.to_string(),
            kind: message.kind().to_owned(),
            payload: serde_json::to_value(message)?,
            created_at: String::new(),
        })
    }
}

/// Persistence operations the hub relies on.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert (or replace) a connection record. Returns the record as stored,
    /// with store-assigned `connected_at`/`last_health_at`.
    async fn create_connection(&self, record: &ConnectionRecord) -> Result<ConnectionRecord>;

    /// Fetch a record by connection ID.
    async fn get_connection(&self, connection_id: &str) -> Result<Option<ConnectionRecord>>;

    /// Flip a record to `disconnected` and stamp `last_health_at`.
    /// Returns whether a record changed.
    async fn mark_disconnected(&self, connection_id: &str) -> Result<bool>;

    /// Overwrite the stored subscription list with `subscriptions`.
    async fn replace_subscriptions(
        &self,
        connection_id: &str,
        subscriptions: &[Subscription],
    ) -> Result<bool>;

    /// Stamp `last_health_at` with the current server time.
    async fn touch_health(&self, connection_id: &str) -> Result<bool>;

    /// Persist message counters.
    async fn record_stats(
        &self,
        connection_id: &str,
        message_count: u64,
        last_message_at: Option<&str>,
    ) -> Result<bool>;

    /// Delete a record outright.
    async fn delete_connection(&self, connection_id: &str) -> Result<bool>;

    /// Records for a tenant with the given status, newest first.
    async fn list_connections(
        &self,
        tenant_id: &str,
        status: ConnectionStatus,
    ) -> Result<Vec<ConnectionRecord>>;

    /// Up to `limit` `connected` records whose `last_health_at` is before `cutoff`,
    /// oldest first.
    async fn stale_connections(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ConnectionRecord>>;

    /// Append a message-log entry. The store assigns `created_at`.
    async fn append_message(&self, entry: &MessageLogEntry) -> Result<()>;

    /// Most recent log entries for a connection, newest first.
    async fn messages_for_connection(
        &self,
        connection_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>>;

    /// Delete up to `limit` log entries created before `cutoff`, oldest first.
    /// Returns the number deleted.
    async fn purge_messages_before(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize>;
}
