use chrono::Utc;
use serde::{Serialize, Deserialize};
use crate::types::Dock;

/// API path prefix
pub const API_PREFIX: &str = "/api";

/// Websocket upgrade path for the sync protocol
pub const WS_PATH: &str = "/ws";

/// Cache key holding the full dock list
pub const ALL_DOCKS_KEY: &str = "all_docks";

/// Websocket close codes used by the sync protocol
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
    /// Sent when the server is at its connection limit
    pub const TRY_AGAIN_LATER: u16 = 1013;
}

/// Messages exchanged on a sync connection. The `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// Complete dock list; `timestamp` is Unix seconds
    FullSync { docks: Vec<Dock>, timestamp: i64 },
    DockUpdated { data: Dock },
    Heartbeat,
    #[serde(rename = "heartbeat-ack", alias = "heartbeat_ack")]
    HeartbeatAck,
    Ping,
    Pong,
    RequestFullSync,
}

impl SyncMessage {
    pub fn full_sync(docks: Vec<Dock>) -> Self {
        SyncMessage::FullSync {
            docks,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn dock_updated(dock: Dock) -> Self {
        SyncMessage::DockUpdated { data: dock }
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Wire tag of this message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::FullSync { .. } => "full_sync",
            SyncMessage::DockUpdated { .. } => "dock_updated",
            SyncMessage::Heartbeat => "heartbeat",
            SyncMessage::HeartbeatAck => "heartbeat-ack",
            SyncMessage::Ping => "ping",
            SyncMessage::Pong => "pong",
            SyncMessage::RequestFullSync => "request_full_sync",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DockLocation, DockStatus};
    use serde_json::{json, Value};

    fn dock() -> Dock {
        Dock {
            id: 14,
            location: DockLocation::Southwest,
            number: 1,
            name: Some("H84".to_string()),
            status: DockStatus::Deiced,
        }
    }

    #[test]
    fn test_dock_updated_shape() {
        let text = SyncMessage::dock_updated(dock()).to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "dock_updated",
                "data": {
                    "id": 14,
                    "location": "southwest",
                    "number": 1,
                    "name": "H84",
                    "status": "deiced"
                }
            })
        );
    }

    #[test]
    fn test_full_sync_shape() {
        let text = SyncMessage::full_sync(vec![dock()]).to_json().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "full_sync");
        assert_eq!(value["docks"].as_array().unwrap().len(), 1);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn test_parse_client_messages() {
        assert_eq!(SyncMessage::parse(r#"{"type":"ping"}"#).unwrap(), SyncMessage::Ping);
        assert_eq!(
            SyncMessage::parse(r#"{"type":"request_full_sync"}"#).unwrap(),
            SyncMessage::RequestFullSync
        );
        assert_eq!(
            SyncMessage::parse(r#"{"type":"heartbeat-ack"}"#).unwrap(),
            SyncMessage::HeartbeatAck
        );
        assert_eq!(
            SyncMessage::parse(r#"{"type":"heartbeat_ack"}"#).unwrap(),
            SyncMessage::HeartbeatAck
        );
        assert_eq!(SyncMessage::HeartbeatAck.to_json().unwrap(), r#"{"type":"heartbeat-ack"}"#);
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(SyncMessage::parse(r#"{"type":"subscribe"}"#).is_err());
        assert!(SyncMessage::parse(r#"{"kind":"ping"}"#).is_err());
        assert!(SyncMessage::parse("not json").is_err());
    }
}
