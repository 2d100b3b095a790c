//! Raw row structs and their conversion into domain records.

use relay_core::{
    ConnectionMeta, ConnectionRecord, ConnectionStatus, LogEntryId, MessageLogEntry, Subscription,
};

use crate::errors::Result;

/// A row of the `connections` table.
#[derive(Clone, Debug)]
pub struct ConnectionRow {
    /// Connection ID.
    pub connection_id: String,
    /// Owning principal.
    pub user_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// `connected` or `disconnected`.
    pub status: String,
    /// Registration timestamp.
    pub connected_at: String,
    /// Last health acknowledgement timestamp.
    pub last_health_at: String,
    /// Last outbound message timestamp.
    pub last_message_at: Option<String>,
    /// Messages sent.
    pub message_count: i64,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Remote address.
    pub source_address: Option<String>,
    /// JSON array of subscriptions.
    pub subscriptions: String,
}

impl ConnectionRow {
    /// Decode into a [`ConnectionRecord`].
    pub fn into_record(self) -> Result<ConnectionRecord> {
        let subscriptions: Vec<Subscription> = serde_json::from_str(&self.subscriptions)?;
        Ok(ConnectionRecord {
            connection_id: self.connection_id,
            user_id: self.user_id,
            tenant_id: self.tenant_id,
            status: ConnectionStatus::from_str_lossy(&self.status),
            connected_at: self.connected_at,
            last_health_at: self.last_health_at,
            last_message_at: self.last_message_at,
            message_count: u64::try_from(self.message_count).unwrap_or(0),
            meta: ConnectionMeta {
                user_agent: self.user_agent,
                source_address: self.source_address,
            },
            subscriptions,
        })
    }
}

/// A row of the `message_log` table.
#[derive(Clone, Debug)]
pub struct MessageLogRow {
    /// Entry ID.
    pub id: String,
    /// Tenant of the receiving connection.
    pub tenant_id: String,
    /// Receiving connection.
    pub connection_id: String,
    /// Owning principal.
    pub user_id: String,
    /// Mirrored message ID.
    pub message_id: String,
    /// Message kind.
    pub kind: String,
    /// Serialized message JSON.
    pub payload: String,
    /// Write timestamp.
    pub created_at: String,
}

impl MessageLogRow {
    /// Decode into a [`MessageLogEntry`].
    pub fn into_entry(self) -> Result<MessageLogEntry> {
        Ok(MessageLogEntry {
            id: LogEntryId::from_string(self.id),
            tenant_id: self.tenant_id,
            connection_id: self.connection_id,
            user_id: self.user_id,
            message_id: self.message_id,
            kind: self.kind,
            payload: serde_json::from_str(&self.payload)?,
            created_at: self.created_at,
        })
    }
}
