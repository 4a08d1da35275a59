//! Fan-out of one message to many connections.

use shared::protocol::SyncMessage;
use crate::store_manager::{DockChange, Snapshot};
use crate::sync::channel::{ConnectionChannel, ConnectionId};
use crate::sync::registry::RegistryHandle;

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    /// Connections whose channel refused the message; the registry drops them
    pub failed: Vec<ConnectionId>,
}

/// Send `text` to every target. A failed send is recorded and the pass
/// continues with the next connection.
pub fn fan_out<'a, I>(targets: I, text: &str) -> DeliveryReport
where
    I: IntoIterator<Item = (ConnectionId, &'a ConnectionChannel)>,
{
    let mut report = DeliveryReport::default();
    for (id, channel) in targets {
        match channel.send_text(text.to_string()) {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Delivery failed");
                report.failed.push(id);
            }
        }
    }
    report
}

/// Serialize once and fan out. Serialization failure delivers nothing.
pub fn fan_out_message<'a, I>(targets: I, message: &SyncMessage) -> DeliveryReport
where
    I: IntoIterator<Item = (ConnectionId, &'a ConnectionChannel)>,
{
    match message.to_json() {
        Ok(text) => fan_out(targets, &text),
        Err(e) => {
            tracing::error!(kind = message.kind(), "Failed to serialize message: {}", e);
            DeliveryReport::default()
        }
    }
}

/// Announces state changes to every registered connection.
///
/// Broadcasting never fails from the caller's point of view: per-connection
/// failures are handled inside the registry, and a stopped registry is logged.
#[derive(Clone)]
pub struct Broadcaster {
    registry: RegistryHandle,
}

impl Broadcaster {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    /// Send `dock_updated` for a committed change
    pub async fn dock_updated(&self, change: DockChange) -> DeliveryReport {
        match self.registry.publish_update(change).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Dropping dock_updated broadcast: {}", e);
                DeliveryReport::default()
            }
        }
    }

    /// Send `full_sync` built from `snapshot` to every open connection
    pub async fn full_sync(&self, snapshot: Snapshot) -> DeliveryReport {
        match self.registry.resync_all(snapshot).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Dropping full_sync broadcast: {}", e);
                DeliveryReport::default()
            }
        }
    }
}
