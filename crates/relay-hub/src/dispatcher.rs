//! Message dispatch.
//!
//! Every send follows the same sequence: serialize, write to the transport
//! synchronously (so per-connection order is the order of calls), bump the
//! in-memory counters, then mirror a log entry into the store. Transport and
//! store failures are logged and never surface to the caller.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use relay_core::{
    DomainEvent, MessageLogEntry, Notification, OutboundMessage, RecordStore, timestamp,
};
use tracing::{debug, warn};

use crate::connection::LiveConnection;
use crate::matcher;
use crate::metrics::{MESSAGES_SENT_TOTAL, TRANSPORT_FAILURES_TOTAL};
use crate::registry::Registry;
use crate::transport::TransportError;

/// Sends messages to live connections.
pub struct Dispatcher {
    registry: Arc<Registry>,
    store: Arc<dyn RecordStore>,
    max_message_bytes: usize,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`, rejecting frames above `max_message_bytes`.
    pub fn new(registry: Arc<Registry>, max_message_bytes: usize) -> Self {
        let store = Arc::clone(registry.store());
        Self {
            registry,
            store,
            max_message_bytes,
        }
    }

    /// Send one message to one connection. Unknown IDs are a no-op.
    ///
    /// Returns whether the connection was live.
    pub async fn send(&self, connection_id: &str, message: &OutboundMessage) -> bool {
        let Some(conn) = self.registry.get(connection_id) else {
            debug!(
                conn_id = connection_id,
                kind = message.kind(),
                "send to unknown connection ignored"
            );
            return false;
        };
        let Some(frame) = self.encode(message) else {
            return false;
        };
        let entry = self.write(&conn, message, &frame);
        self.mirror(entry).await;
        true
    }

    /// Deliver `event` to every matching connection of its tenant.
    ///
    /// Returns the number of recipients.
    pub async fn broadcast(&self, event: DomainEvent) -> usize {
        let recipients = matcher::matching_connections(&self.registry, &event);
        debug!(
            tenant_id = %event.tenant_id,
            entity_id = %event.entity_id,
            event_type = %event.event_type,
            category = %event.category,
            recipients = recipients.len(),
            "broadcast event"
        );
        self.fan_out(&recipients, &OutboundMessage::event(event)).await
    }

    /// Deliver `notification` to every live connection of `tenant_id`, unfiltered.
    ///
    /// Returns the number of recipients.
    pub async fn notify(&self, tenant_id: &str, notification: Notification) -> usize {
        let recipients = self.registry.tenant_connections(tenant_id);
        debug!(tenant_id, recipients = recipients.len(), "notify tenant");
        self.fan_out(&recipients, &OutboundMessage::notification(notification))
            .await
    }

    async fn fan_out(
        &self,
        recipients: &[Arc<LiveConnection>],
        message: &OutboundMessage,
    ) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        let Some(frame) = self.encode(message) else {
            return 0;
        };
        // All transport writes happen before the first store await.
        let entries: Vec<_> = recipients
            .iter()
            .map(|conn| self.write(conn, message, &frame))
            .collect();
        let _ = join_all(entries.into_iter().map(|e| self.mirror(e))).await;
        recipients.len()
    }

    fn encode(&self, message: &OutboundMessage) -> Option<Arc<String>> {
        match serde_json::to_string(message) {
            Ok(json) => Some(Arc::new(json)),
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "failed to serialize message");
                None
            }
        }
    }

    /// Synchronous part of a send. Returns the log entry to mirror.
    fn write(
        &self,
        conn: &LiveConnection,
        message: &OutboundMessage,
        frame: &Arc<String>,
    ) -> Option<MessageLogEntry> {
        let outcome = if frame.len() > self.max_message_bytes {
            Err(TransportError::TooLarge {
                size: frame.len(),
                limit: self.max_message_bytes,
            })
        } else {
            conn.write(Arc::clone(frame))
        };
        match outcome {
            Ok(()) => counter!(MESSAGES_SENT_TOTAL, "kind" => message.kind()).increment(1),
            Err(e) => {
                counter!(TRANSPORT_FAILURES_TOTAL, "reason" => e.reason()).increment(1);
                warn!(
                    conn_id = %conn.id,
                    message_id = %message.id,
                    error = %e,
                    "transport write failed"
                );
            }
        }
        conn.record_sent(timestamp(Utc::now()));

        match MessageLogEntry::for_message(&conn.tenant_id, &conn.id, &conn.user_id, message) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(conn_id = %conn.id, error = %e, "failed to build message log entry");
                None
            }
        }
    }

    async fn mirror(&self, entry: Option<MessageLogEntry>) {
        let Some(entry) = entry else { return };
        if let Err(e) = self.store.append_message(&entry).await {
            warn!(
                conn_id = %entry.connection_id,
                message_id = %entry.message_id,
                error = %e,
                "failed to append message log entry"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
