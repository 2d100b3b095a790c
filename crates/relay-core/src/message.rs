//! Outbound delivery units.
//!
//! Wire format (JSON):
//!
//! ```text
//! {"id":"msg_…","timestamp":"2026-…Z","type":"event","subscriptionType":"entity","event":{…}}
//! {"id":"msg_…","timestamp":"2026-…Z","type":"notification","notification":{…}}
//! {"id":"msg_…","timestamp":"2026-…Z","type":"ping"}
//! ```

use serde::{Deserialize, Serialize};

use crate::event::{DomainEvent, Notification};
use crate::ids::MessageId;
use crate::subscription::SubscriptionType;

/// Kind-specific body of an outbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePayload {
    /// A matched domain event.
    #[serde(rename_all = "camelCase")]
    Event {
        /// Category the event was matched under.
        subscription_type: SubscriptionType,
        /// The event itself.
        event: DomainEvent,
    },
    /// A tenant-wide notice.
    Notification {
        /// The notice.
        notification: Notification,
    },
    /// Liveness probe; the client answers with `pong`.
    Ping,
    /// Liveness acknowledgement.
    Pong,
}

impl MessagePayload {
    /// Wire name of the kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Event { .. } => "event",
            Self::Notification { .. } => "notification",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// An immutable, identified, timestamped message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Unique message ID.
    pub id: MessageId,
    /// Creation time (RFC 3339).
    pub timestamp: String,
    /// Kind and body.
    #[serde(flatten)]
    pub payload: MessagePayload,
}

impl OutboundMessage {
    /// Stamp a payload with a fresh ID and the current time.
    pub fn new(payload: MessagePayload) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: crate::timestamp(chrono::Utc::now()),
            payload,
        }
    }

    /// Wrap a matched event.
    pub fn event(event: DomainEvent) -> Self {
        Self::new(MessagePayload::Event {
            subscription_type: event.category,
            event,
        })
    }

    /// Wrap a notification.
    pub fn notification(notification: Notification) -> Self {
        Self::new(MessagePayload::Notification { notification })
    }

    /// A ping probe.
    pub fn ping() -> Self {
        Self::new(MessagePayload::Ping)
    }

    /// A pong reply.
    pub fn pong() -> Self {
        Self::new(MessagePayload::Pong)
    }

    /// Wire name of the kind.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
