//! End-to-end tests over a real socket.

#![allow(unused_results)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::{DomainEvent, MemoryRecordStore, SubscriptionType};
use relay_hub::Hub;
use relay_server::RelayServer;
use relay_server::metrics::detached_handle;
use relay_settings::RelaySettings;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    hub: Arc<Hub>,
    base: String,
}

async fn boot(cap: usize) -> TestServer {
    let mut settings = RelaySettings::default();
    settings.server.port = 0;
    settings.connections.max_per_tenant = cap;
    let hub = Arc::new(Hub::new(Arc::new(MemoryRecordStore::new()), &settings));
    let server = RelayServer::new(Arc::clone(&hub), settings, detached_handle());
    let (addr, _handle) = server.listen().await.unwrap();
    TestServer {
        hub,
        base: format!("ws://{addr}/ws"),
    }
}

async fn connect(server: &TestServer, user: &str, tenant: &str) -> WsStream {
    let url = format!("{}?userId={user}&tenantId={tenant}", server.base);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn read_close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("timeout waiting for close") {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => {}
            Some(Err(_)) | None => return None,
        }
    }
}

async fn subscribe(ws: &mut WsStream, filters: Value) -> String {
    send_json(
        ws,
        json!({"type": "subscribe", "subscriptionType": "entity", "filters": filters, "requestId": "r1"}),
    )
    .await;
    let reply = read_json(ws).await;
    assert_eq!(reply["type"], "subscribed");
    assert_eq!(reply["requestId"], "r1");
    reply["subscriptionId"].as_str().unwrap().to_owned()
}

async fn wait_for_len(hub: &Hub, expected: usize) {
    timeout(TIMEOUT, async {
        while hub.registry().len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected size");
}

#[tokio::test]
async fn subscribed_socket_receives_matching_event() {
    let server = boot(10).await;
    let mut ws = connect(&server, "u1", "T1").await;
    subscribe(&mut ws, json!({"entities": ["e-42"]})).await;

    let miss = DomainEvent::new("T1", SubscriptionType::Entity, "e-99", "updated");
    let hit = DomainEvent::new("T1", SubscriptionType::Entity, "e-42", "updated");
    assert_eq!(server.hub.broadcast(miss).await, 0);
    assert_eq!(server.hub.broadcast(hit).await, 1);

    let msg = read_json(&mut ws).await;
    assert_eq!(msg["type"], "event");
    assert_eq!(msg["subscriptionType"], "entity");
    assert_eq!(msg["event"]["entityId"], "e-42");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let server = boot(10).await;
    let mut ws = connect(&server, "u1", "T1").await;
    let sub = subscribe(&mut ws, json!({})).await;

    send_json(&mut ws, json!({"type": "unsubscribe", "subscriptionId": sub})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["type"], "unsubscribed");
    assert_eq!(reply["removed"], true);

    let event = DomainEvent::new("T1", SubscriptionType::Entity, "e-1", "updated");
    assert_eq!(server.hub.broadcast(event).await, 0);
}

#[tokio::test]
async fn client_ping_gets_pong_message() {
    let server = boot(10).await;
    let mut ws = connect(&server, "u1", "T1").await;
    send_json(&mut ws, json!({"type": "ping"})).await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");
    assert!(reply["id"].as_str().unwrap().starts_with("msg_"));
}

#[tokio::test]
async fn over_quota_socket_is_closed_with_policy_code() {
    let server = boot(1).await;
    let mut first = connect(&server, "u1", "T1").await;
    subscribe(&mut first, json!({})).await;

    let mut second = connect(&server, "u2", "T1").await;
    assert_eq!(read_close_code(&mut second).await, Some(1008));

    let mut other_tenant = connect(&server, "u3", "T2").await;
    subscribe(&mut other_tenant, json!({})).await;
    assert_eq!(server.hub.registry().len(), 2);
}

#[tokio::test]
async fn client_disconnect_unregisters() {
    let server = boot(10).await;
    let mut ws = connect(&server, "u1", "T1").await;
    subscribe(&mut ws, json!({})).await;
    assert_eq!(server.hub.connections_for_tenant("T1").len(), 1);

    ws.close(None).await.unwrap();
    wait_for_len(&server.hub, 0).await;
    assert!(server.hub.connections_for_tenant("T1").is_empty());
}

#[tokio::test]
async fn hub_shutdown_closes_sockets() {
    let server = boot(10).await;
    let mut ws = connect(&server, "u1", "T1").await;
    subscribe(&mut ws, json!({})).await;

    server.hub.shutdown().await;
    assert_eq!(read_close_code(&mut ws).await, Some(1000));
}
