//! End-to-end tests: real router on a random port, websocket and HTTP clients.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use dockd::config::Config;
use dockd::Service;
use shared::protocol::SyncMessage;
use shared::types::{Dock, DockStatus};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn test_config() -> Config {
    let mut config = Config::default();
    config.store.db_path = PathBuf::from(":memory:");
    config.sync.full_sync_interval_secs = 0;
    config
}

/// Start the service on a random port and return its address
async fn start_test_server(config: Config) -> SocketAddr {
    let service = Service::start(&config, CancellationToken::new()).unwrap();
    let app = service.router();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let _service = service;
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

/// Next sync message, skipping transport control frames
async fn next_message(ws: &mut Client) -> SyncMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for a message")
            .expect("Stream ended")
            .expect("WebSocket error");
        match frame {
            Message::Text(text) => return SyncMessage::parse(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

async fn connect_synced(addr: SocketAddr) -> (Client, Vec<Dock>) {
    let mut ws = connect(addr).await;
    match next_message(&mut ws).await {
        SyncMessage::FullSync { docks, .. } => (ws, docks),
        other => panic!("First message must be full_sync, got {:?}", other),
    }
}

async fn send(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string())).await.unwrap();
}

async fn put_status(addr: SocketAddr, id: i64, status: &str) -> reqwest::Response {
    reqwest::Client::new()
        .put(format!("http://{}/api/docks/{}", addr, id))
        .json(&json!({ "status": status }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_first_message_is_full_sync() {
    let addr = start_test_server(test_config()).await;
    let (_ws, docks) = connect_synced(addr).await;

    assert_eq!(docks.len(), 24);
    assert!(docks.iter().all(|d| d.status == DockStatus::Available));
    assert!(docks.iter().any(|d| d.name.as_deref() == Some("H84")));
}

#[tokio::test]
async fn test_update_reaches_every_client() {
    let addr = start_test_server(test_config()).await;
    let (mut a, _) = connect_synced(addr).await;
    let (mut b, _) = connect_synced(addr).await;

    let resp = put_status(addr, 7, "occupied").await;
    assert_eq!(resp.status(), 200);
    let dock: Dock = resp.json().await.unwrap();
    assert_eq!(dock.id, 7);
    assert_eq!(dock.status, DockStatus::Occupied);

    for ws in [&mut a, &mut b] {
        assert_eq!(next_message(ws).await, SyncMessage::dock_updated(dock.clone()));
    }
}

#[tokio::test]
async fn test_list_reflects_write_immediately() {
    let addr = start_test_server(test_config()).await;
    let url = format!("http://{}/api/docks", addr);

    // Populate the cache
    let before: Vec<Dock> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(before.len(), 24);

    assert_eq!(put_status(addr, 2, "out-of-service").await.status(), 200);

    let after: Vec<Dock> = reqwest::get(&url).await.unwrap().json().await.unwrap();
    let dock = after.iter().find(|d| d.id == 2).unwrap();
    assert_eq!(dock.status, DockStatus::OutOfService);
}

#[tokio::test]
async fn test_request_full_sync_returns_current_state() {
    let addr = start_test_server(test_config()).await;
    let (mut ws, _) = connect_synced(addr).await;

    assert_eq!(put_status(addr, 20, "deiced").await.status(), 200);
    assert!(matches!(next_message(&mut ws).await, SyncMessage::DockUpdated { .. }));

    send(&mut ws, r#"{"type":"request_full_sync"}"#).await;
    match next_message(&mut ws).await {
        SyncMessage::FullSync { docks, .. } => {
            let dock = docks.iter().find(|d| d.id == 20).unwrap();
            assert_eq!(dock.status, DockStatus::Deiced);
        }
        other => panic!("Expected full_sync, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_and_malformed_input() {
    let addr = start_test_server(test_config()).await;
    let (mut ws, _) = connect_synced(addr).await;

    send(&mut ws, "definitely not json").await;
    send(&mut ws, r#"{"type":"ping"}"#).await;
    assert_eq!(next_message(&mut ws).await, SyncMessage::Pong);

    send(&mut ws, r#"{"type":"heartbeat"}"#).await;
    assert_eq!(next_message(&mut ws).await, SyncMessage::HeartbeatAck);
}

#[tokio::test]
async fn test_capacity_rejection_uses_1013() {
    let mut config = test_config();
    config.sync.max_connections = 1;
    let addr = start_test_server(config).await;

    let (_first, _) = connect_synced(addr).await;
    let mut second = connect(addr).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), second.next())
        .await
        .expect("Expected close frame within timeout");
    match frame {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 1013);
            assert_eq!(frame.reason, "Maximum connections reached");
        }
        other => panic!("Expected close frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_errors() {
    let addr = start_test_server(test_config()).await;

    let resp = put_status(addr, 999, "occupied").await;
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("999"));

    let resp = put_status(addr, 1, "flooded").await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());

    let resp = reqwest::get(format!("http://{}/api/docks/999", addr)).await.unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::get(format!("http://{}/api/docks/1", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let dock: Dock = resp.json().await.unwrap();
    assert_eq!(dock.id, 1);
}

#[tokio::test]
async fn test_hash_and_health() {
    let addr = start_test_server(test_config()).await;
    let hash_url = format!("http://{}/api/docks/hash", addr);

    let before = reqwest::get(&hash_url).await.unwrap().text().await.unwrap();
    assert_eq!(before.len(), 64);

    assert_eq!(put_status(addr, 3, "occupied").await.status(), 200);
    let after = reqwest::get(&hash_url).await.unwrap().text().await.unwrap();
    assert_ne!(before, after);

    let (_ws, _) = connect_synced(addr).await;
    let health: serde_json::Value = reqwest::get(format!("http://{}/api/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "OK", "connections": 1 }));
}
