//! Inbound message handling for one sync connection.

use shared::protocol::SyncMessage;
use crate::store_manager::StoreHandle;
use crate::sync::channel::ConnectionId;
use crate::sync::registry::{DisconnectReason, RegistryHandle};

/// Read a fresh snapshot and open the connection with it. A failed store read
/// closes the connection, since it would otherwise start without a baseline.
/// Returns whether the connection is open.
pub async fn send_initial_sync(
    id: ConnectionId,
    registry: &RegistryHandle,
    store: &StoreHandle,
) -> bool {
    let snapshot = match store.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(connection_id = %id, "Initial sync failed: {:#}", e);
            registry.disconnect(id, DisconnectReason::InitialSyncFailed).await;
            return false;
        }
    };

    match registry.open(id, snapshot).await {
        Ok(open) => open,
        Err(e) => {
            tracing::warn!(connection_id = %id, "Could not open connection: {}", e);
            false
        }
    }
}

/// Answer `request_full_sync` from current store state, never from the cache
pub async fn send_full_sync(id: ConnectionId, registry: &RegistryHandle, store: &StoreHandle) {
    let snapshot = match store.snapshot().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!(connection_id = %id, "Failed to load docks for full sync: {:#}", e);
            return;
        }
    };

    if let Err(e) = registry.resync(id, snapshot).await {
        tracing::warn!(connection_id = %id, "Full sync not delivered: {}", e);
    }
}

async fn reply(id: ConnectionId, registry: &RegistryHandle, message: SyncMessage) {
    if let Err(e) = registry.send_to(id, message).await {
        tracing::warn!(connection_id = %id, "Reply not delivered: {}", e);
    }
}

/// Dispatch one inbound text frame. Malformed input is logged and dropped;
/// the connection stays up.
pub async fn handle_text(
    text: &str,
    id: ConnectionId,
    registry: &RegistryHandle,
    store: &StoreHandle,
) {
    let message = match SyncMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(connection_id = %id, error = %e, "Discarding malformed message");
            return;
        }
    };

    tracing::debug!(connection_id = %id, kind = message.kind(), "Received message");

    match message {
        SyncMessage::Ping => {
            registry.mark_alive(id).await;
            reply(id, registry, SyncMessage::Pong).await;
        }
        SyncMessage::Heartbeat => {
            registry.mark_alive(id).await;
            reply(id, registry, SyncMessage::HeartbeatAck).await;
        }
        SyncMessage::Pong | SyncMessage::HeartbeatAck => registry.mark_alive(id).await,
        SyncMessage::RequestFullSync => send_full_sync(id, registry, store).await,
        other => {
            tracing::debug!(
                connection_id = %id,
                kind = other.kind(),
                "Ignoring server-only message"
            );
        }
    }
}
