//! Durable connection record shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::subscription::Subscription;

/// Lifecycle status of a connection record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Registered and routable.
    Connected,
    /// Unregistered, timed out, or reaped by the sweeper.
    Disconnected,
}

impl ConnectionStatus {
    /// Storage/wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }

    /// Parse a storage name, treating anything unknown as disconnected.
    pub fn from_str_lossy(s: &str) -> Self {
        if s == "connected" {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic metadata captured at registration (audit only).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMeta {
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Remote address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
}

/// One client session, as persisted and as reported to administrative callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    /// Caller-supplied unique ID.
    pub connection_id: String,
    /// Owning principal.
    pub user_id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Current status.
    pub status: ConnectionStatus,
    /// Registration time (RFC 3339).
    pub connected_at: String,
    /// Last successful health acknowledgement (RFC 3339).
    pub last_health_at: String,
    /// Last outbound message (RFC 3339).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
    /// Messages sent so far.
    pub message_count: u64,
    /// Diagnostics.
    #[serde(flatten)]
    pub meta: ConnectionMeta,
    /// Active subscriptions.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl ConnectionRecord {
    /// A freshly registered record with no subscriptions.
    pub fn new(
        connection_id: impl Into<String>,
        user_id: impl Into<String>,
        tenant_id: impl Into<String>,
        meta: ConnectionMeta,
    ) -> Self {
        let now = crate::timestamp(chrono::Utc::now());
        Self {
            connection_id: connection_id.into(),
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            status: ConnectionStatus::Connected,
            connected_at: now.clone(),
            last_health_at: now,
            last_message_at: None,
            message_count: 0,
            meta,
            subscriptions: Vec::new(),
        }
    }

    /// Whether the record is routable.
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}
