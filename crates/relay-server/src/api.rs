//! HTTP ingestion and query routes.

use axum::Json;
use axum::extract::{Path, State};
use relay_core::{ConnectionRecord, DomainEvent, Notification, SubscriptionType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::AppState;

/// Body of `POST /tenants/{tenantId}/events`. The tenant comes from the path.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    /// Entity the event refers to.
    pub entity_id: String,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Category used for matching.
    pub category: SubscriptionType,
    /// Opaque payload; `data.tags` feeds tag filters.
    #[serde(default)]
    pub data: Value,
}

impl EventBody {
    /// Attach the tenant from the path.
    pub fn into_event(self, tenant_id: String) -> DomainEvent {
        DomainEvent::new(tenant_id, self.category, self.entity_id, self.event_type)
            .with_data(self.data)
    }
}

/// How many connections a publish reached.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryResponse {
    /// Successful deliveries.
    pub recipients: usize,
}

/// `POST /tenants/{tenantId}/events`
pub async fn publish_event(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(body): Json<EventBody>,
) -> Json<DeliveryResponse> {
    let recipients = state.hub.broadcast(body.into_event(tenant_id)).await;
    Json(DeliveryResponse { recipients })
}

/// `POST /tenants/{tenantId}/notifications`
pub async fn publish_notification(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(notification): Json<Notification>,
) -> Json<DeliveryResponse> {
    let recipients = state.hub.notify(&tenant_id, notification).await;
    Json(DeliveryResponse { recipients })
}

/// `GET /tenants/{tenantId}/connections`
pub async fn list_connections(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Json<Vec<ConnectionRecord>> {
    Json(state.hub.connections_for_tenant(&tenant_id))
}
