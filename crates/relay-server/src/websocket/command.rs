//! Inbound client commands.
//!
//! ```text
//! {"type":"subscribe","subscriptionType":"entity","filters":{"entities":["e-42"]},"requestId":"r1"}
//! {"type":"unsubscribe","subscriptionId":"sub_…"}
//! {"type":"ping"}
//! {"type":"pong"}
//! ```

use metrics::counter;
use relay_core::{OutboundMessage, SubscriptionFilters, SubscriptionId, SubscriptionType};
use relay_hub::Hub;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::metrics::{WS_COMMANDS_TOTAL, WS_INVALID_COMMANDS_TOTAL};

/// A command sent by the client over its socket.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// Attach a subscription.
    #[serde(rename_all = "camelCase")]
    Subscribe {
        /// Category name; unknown names are answered with an error.
        subscription_type: String,
        /// Conjunctive filters; absent means wildcard.
        #[serde(default)]
        filters: SubscriptionFilters,
        /// Echoed back in the reply.
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Detach a subscription.
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        /// Subscription to remove.
        subscription_id: SubscriptionId,
        /// Echoed back in the reply.
        #[serde(default)]
        request_id: Option<String>,
    },
    /// Client liveness check; answered with a `pong` message.
    Ping,
    /// Answer to a server `ping`.
    Pong,
}

impl ClientCommand {
    const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Direct reply to a command, written only to the issuing socket.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandReply {
    /// Subscription attached.
    #[serde(rename_all = "camelCase")]
    Subscribed {
        /// New subscription ID.
        subscription_id: SubscriptionId,
        /// Parsed category.
        subscription_type: SubscriptionType,
        /// From the command.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Unsubscribe processed.
    #[serde(rename_all = "camelCase")]
    Unsubscribed {
        /// Subscription named by the command.
        subscription_id: SubscriptionId,
        /// Whether it existed.
        removed: bool,
        /// From the command.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// The command could not be applied.
    #[serde(rename_all = "camelCase")]
    Error {
        /// Human-readable reason.
        message: String,
        /// From the command, when it parsed far enough.
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl CommandReply {
    fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Error {
            message: message.into(),
            request_id,
        }
    }
}

/// Parse and apply one text frame from `connection_id`.
///
/// Returns the reply to write back, if the command has one. `ping` is
/// answered through the hub so the `pong` is logged like any other message.
pub async fn handle_text(hub: &Hub, connection_id: &str, text: &str) -> Option<CommandReply> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            counter!(WS_INVALID_COMMANDS_TOTAL).increment(1);
            debug!(conn_id = connection_id, error = %e, "unparseable client frame");
            return Some(CommandReply::error(format!("invalid command: {e}"), None));
        }
    };
    counter!(WS_COMMANDS_TOTAL, "command" => command.name()).increment(1);

    match command {
        ClientCommand::Subscribe {
            subscription_type,
            filters,
            request_id,
        } => {
            let subscription_type = match subscription_type.parse::<SubscriptionType>() {
                Ok(t) => t,
                Err(e) => return Some(CommandReply::error(e.to_string(), request_id)),
            };
            Some(
                match hub
                    .add_subscription(connection_id, subscription_type, filters)
                    .await
                {
                    Ok(subscription_id) => CommandReply::Subscribed {
                        subscription_id,
                        subscription_type,
                        request_id,
                    },
                    Err(e) => CommandReply::error(e.to_string(), request_id),
                },
            )
        }
        ClientCommand::Unsubscribe {
            subscription_id,
            request_id,
        } => {
            let removed = hub
                .remove_subscription(connection_id, &subscription_id)
                .await;
            Some(CommandReply::Unsubscribed {
                subscription_id,
                removed,
                request_id,
            })
        }
        ClientCommand::Ping => {
            let _ = hub.send(connection_id, &OutboundMessage::pong()).await;
            None
        }
        ClientCommand::Pong => {
            let _ = hub.handle_pong(connection_id).await;
            None
        }
    }
}
