//! Connection registry.
//!
//! One task owns every connection record: its channel, lifecycle phase,
//! liveness flag and pending heartbeat deadline. Everything else talks to it
//! through [`RegistryHandle`], so commands, heartbeat ticks and deadline
//! expiries are applied one at a time in arrival order and the map needs no lock.

use std::collections::HashMap;
use std::future::poll_fn;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::time::{delay_queue, DelayQueue};
use shared::protocol::{close_code, SyncMessage};
use crate::config::SyncConfig;
use crate::store_manager::{DockChange, Snapshot};
use crate::sync::broadcast::{self, DeliveryReport};
use crate::sync::channel::{ConnectionChannel, ConnectionId};

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl From<&SyncConfig> for RegistryConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_connections: config.max_connections,
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection limit of {max} reached")]
    CapacityExceeded { max: usize },
    #[error("connection registry is not running")]
    Closed,
}

/// Why a connection left the registry; selects the close frame sent to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    LivenessTimeout,
    DeliveryFailed,
    InitialSyncFailed,
    ServerShutdown,
}

impl DisconnectReason {
    fn close_frame(self) -> (u16, &'static str) {
        match self {
            DisconnectReason::ClientClosed => (close_code::NORMAL, "Connection closed"),
            DisconnectReason::LivenessTimeout => (close_code::GOING_AWAY, "Heartbeat timeout"),
            DisconnectReason::DeliveryFailed => (close_code::INTERNAL_ERROR, "Delivery failed"),
            DisconnectReason::InitialSyncFailed => {
                (close_code::INTERNAL_ERROR, "Initial sync failed")
            }
            DisconnectReason::ServerShutdown => (close_code::GOING_AWAY, "Server shutting down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Admitted, initial full_sync not yet sent
    Connecting,
    Open,
}

struct Connection {
    channel: ConnectionChannel,
    phase: Phase,
    alive: bool,
    /// Set while a heartbeat is unanswered
    deadline: Option<delay_queue::Key>,
    connected_at: Instant,
}

impl Connection {
    fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }
}

enum RegistryCommand {
    Connect {
        channel: ConnectionChannel,
        reply: oneshot::Sender<Result<ConnectionId, RegistryError>>,
    },
    Open {
        id: ConnectionId,
        snapshot: Snapshot,
        reply: oneshot::Sender<bool>,
    },
    Disconnect {
        id: ConnectionId,
        reason: DisconnectReason,
    },
    PublishUpdate {
        change: DockChange,
        reply: oneshot::Sender<DeliveryReport>,
    },
    Resync {
        id: ConnectionId,
        snapshot: Snapshot,
        reply: oneshot::Sender<bool>,
    },
    ResyncAll {
        snapshot: Snapshot,
        reply: oneshot::Sender<DeliveryReport>,
    },
    SendTo {
        id: ConnectionId,
        message: SyncMessage,
        reply: oneshot::Sender<bool>,
    },
    MarkAlive(ConnectionId),
    Count(oneshot::Sender<usize>),
    Contains(ConnectionId, oneshot::Sender<bool>),
    Shutdown,
}

/// Handle to the registry task
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn the registry task on the current runtime
    pub fn spawn(config: RegistryConfig) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(Registry::new(config).run(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| RegistryError::Closed)?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    async fn notify(&self, cmd: RegistryCommand) {
        // A stopped registry has already closed every connection
        let _ = self.tx.send(cmd).await;
    }

    /// Admit a connection in the connecting phase. At capacity the channel is
    /// closed with 1013 and `CapacityExceeded` is returned.
    pub async fn connect(&self, channel: ConnectionChannel) -> Result<ConnectionId, RegistryError> {
        self.request(|reply| RegistryCommand::Connect { channel, reply }).await?
    }

    /// Move a connection to open: send `full_sync` for `snapshot`, followed by
    /// any dock update the registry has published since that snapshot was read.
    /// Returns false if the connection is gone.
    pub async fn open(&self, id: ConnectionId, snapshot: Snapshot) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::Open { id, snapshot, reply }).await
    }

    /// Remove a connection. Unknown or already removed ids are ignored.
    pub async fn disconnect(&self, id: ConnectionId, reason: DisconnectReason) {
        self.notify(RegistryCommand::Disconnect { id, reason }).await
    }

    /// Fan out `dock_updated` for a committed change. A change older than one
    /// already published for the same dock is dropped.
    pub async fn publish_update(
        &self,
        change: DockChange,
    ) -> Result<DeliveryReport, RegistryError> {
        self.request(|reply| RegistryCommand::PublishUpdate { change, reply }).await
    }

    /// Send a fresh `full_sync` to one connection, with the same replay as [`RegistryHandle::open`]
    pub async fn resync(
        &self,
        id: ConnectionId,
        snapshot: Snapshot,
    ) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::Resync { id, snapshot, reply }).await
    }

    /// Send `full_sync` to every open connection
    pub async fn resync_all(&self, snapshot: Snapshot) -> Result<DeliveryReport, RegistryError> {
        self.request(|reply| RegistryCommand::ResyncAll { snapshot, reply }).await
    }

    /// Send one message to one connection. Returns false if it is gone or the
    /// send failed.
    pub async fn send_to(
        &self,
        id: ConnectionId,
        message: SyncMessage,
    ) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::SendTo { id, message, reply }).await
    }

    /// Record proof of life; cancels any pending heartbeat deadline
    pub async fn mark_alive(&self, id: ConnectionId) {
        self.notify(RegistryCommand::MarkAlive(id)).await
    }

    pub async fn connection_count(&self) -> Result<usize, RegistryError> {
        self.request(RegistryCommand::Count).await
    }

    pub async fn contains(&self, id: ConnectionId) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::Contains(id, reply)).await
    }

    /// Close every connection and stop the task
    pub async fn shutdown(&self) {
        self.notify(RegistryCommand::Shutdown).await
    }
}

struct Registry {
    config: RegistryConfig,
    connections: HashMap<ConnectionId, Connection>,
    deadlines: DelayQueue<ConnectionId>,
    /// Most recent published change per dock id
    latest: HashMap<i64, DockChange>,
    next_id: u64,
}

impl Registry {
    fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            connections: HashMap::new(),
            deadlines: DelayQueue::new(),
            latest: HashMap::new(),
            next_id: 1,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<RegistryCommand>) {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_connections = self.config.max_connections,
            heartbeat_interval_secs = period.as_secs(),
            heartbeat_timeout_secs = self.config.heartbeat_timeout.as_secs(),
            "Connection registry started"
        );

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd) {
                            break;
                        }
                    }
                    None => break,
                },
                _ = heartbeat.tick() => self.probe_liveness(),
                Some(expired) = poll_fn(|cx| self.deadlines.poll_expired(cx)) => {
                    self.expire(expired.into_inner());
                }
            }
        }

        self.close_all(DisconnectReason::ServerShutdown);
        tracing::info!("Connection registry stopped");
    }

    /// Apply one command. Returns false when the registry should stop.
    fn handle(&mut self, cmd: RegistryCommand) -> bool {
        match cmd {
            RegistryCommand::Connect { channel, reply } => {
                let _ = reply.send(self.admit(channel));
            }
            RegistryCommand::Open { id, snapshot, reply } => {
                let _ = reply.send(self.open(id, &snapshot));
            }
            RegistryCommand::Disconnect { id, reason } => self.remove(id, reason),
            RegistryCommand::PublishUpdate { change, reply } => {
                let _ = reply.send(self.publish_update(change));
            }
            RegistryCommand::Resync { id, snapshot, reply } => {
                let open = self.connections.get(&id).map_or(false, Connection::is_open);
                let delivered = open && self.deliver_snapshot(id, &snapshot);
                let _ = reply.send(delivered);
            }
            RegistryCommand::ResyncAll { snapshot, reply } => {
                let _ = reply.send(self.resync_all(&snapshot));
            }
            RegistryCommand::SendTo { id, message, reply } => {
                let _ = reply.send(self.send_to(id, &message));
            }
            RegistryCommand::MarkAlive(id) => self.mark_alive(id),
            RegistryCommand::Count(reply) => {
                let _ = reply.send(self.connections.len());
            }
            RegistryCommand::Contains(id, reply) => {
                let _ = reply.send(self.connections.contains_key(&id));
            }
            RegistryCommand::Shutdown => return false,
        }
        true
    }

    fn admit(&mut self, channel: ConnectionChannel) -> Result<ConnectionId, RegistryError> {
        let max = self.config.max_connections;
        if self.connections.len() >= max {
            tracing::warn!(max_connections = max, "Rejecting connection at capacity");
            let _ = channel.close(close_code::TRY_AGAIN_LATER, "Maximum connections reached");
            return Err(RegistryError::CapacityExceeded { max });
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.connections.insert(
            id,
            Connection {
                channel,
                phase: Phase::Connecting,
                alive: true,
                deadline: None,
                connected_at: Instant::now(),
            },
        );

        tracing::info!(
            connection_id = %id,
            connections = self.connections.len(),
            "Connection admitted"
        );
        Ok(id)
    }

    fn open(&mut self, id: ConnectionId, snapshot: &Snapshot) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        conn.phase = Phase::Open;
        self.deliver_snapshot(id, snapshot)
    }

    /// `full_sync` followed by replayed updates newer than the snapshot
    fn snapshot_frames(&self, snapshot: &Snapshot) -> Option<Vec<String>> {
        let full_sync = match SyncMessage::full_sync(snapshot.docks.clone()).to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize full_sync: {}", e);
                return None;
            }
        };

        let mut newer: Vec<&DockChange> = self
            .latest
            .values()
            .filter(|change| change.revision > snapshot.revision)
            .collect();
        newer.sort_by_key(|change| change.revision);

        let mut frames = vec![full_sync];
        for change in newer {
            match SyncMessage::dock_updated(change.dock.clone()).to_json() {
                Ok(text) => frames.push(text),
                Err(e) => tracing::error!("Failed to serialize replayed update: {}", e),
            }
        }
        Some(frames)
    }

    fn deliver_snapshot(&mut self, id: ConnectionId, snapshot: &Snapshot) -> bool {
        let Some(frames) = self.snapshot_frames(snapshot) else {
            return false;
        };
        let replayed = frames.len() - 1;
        let delivered = self.send_frames(id, &frames);
        if delivered {
            tracing::debug!(
                connection_id = %id,
                revision = snapshot.revision,
                replayed,
                "Sent full_sync"
            );
        }
        delivered
    }

    fn send_frames(&mut self, id: ConnectionId, frames: &[String]) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        for text in frames {
            if let Err(e) = conn.channel.send_text(text.clone()) {
                tracing::warn!(connection_id = %id, error = %e, "Delivery failed");
                self.remove(id, DisconnectReason::DeliveryFailed);
                return false;
            }
        }
        true
    }

    fn publish_update(&mut self, change: DockChange) -> DeliveryReport {
        let dock_id = change.dock.id;
        if let Some(latest) = self.latest.get(&dock_id) {
            if latest.revision >= change.revision {
                tracing::debug!(
                    dock_id,
                    revision = change.revision,
                    latest = latest.revision,
                    "Skipping superseded dock update"
                );
                return DeliveryReport::default();
            }
        }

        let message = SyncMessage::dock_updated(change.dock.clone());
        self.latest.insert(dock_id, change);
        self.broadcast(&message)
    }

    fn resync_all(&mut self, snapshot: &Snapshot) -> DeliveryReport {
        let Some(frames) = self.snapshot_frames(snapshot) else {
            return DeliveryReport::default();
        };
        let open: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_open())
            .map(|(id, _)| *id)
            .collect();

        let mut report = DeliveryReport::default();
        for id in open {
            if self.send_frames(id, &frames) {
                report.delivered += 1;
            } else {
                report.failed.push(id);
            }
        }
        report
    }

    fn broadcast(&mut self, message: &SyncMessage) -> DeliveryReport {
        let targets = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.is_open())
            .map(|(id, conn)| (*id, &conn.channel));
        let report = broadcast::fan_out_message(targets, message);

        for id in &report.failed {
            self.remove(*id, DisconnectReason::DeliveryFailed);
        }
        report
    }

    fn send_to(&mut self, id: ConnectionId, message: &SyncMessage) -> bool {
        let Some(conn) = self.connections.get(&id) else {
            return false;
        };
        let report = broadcast::fan_out_message([(id, &conn.channel)], message);
        for failed in &report.failed {
            self.remove(*failed, DisconnectReason::DeliveryFailed);
        }
        report.delivered == 1
    }

    fn mark_alive(&mut self, id: ConnectionId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            conn.alive = true;
            if let Some(key) = conn.deadline.take() {
                self.deadlines.try_remove(&key);
            }
        }
    }

    /// Heartbeat tick: every open connection that proved itself alive since
    /// the last tick is flagged dead, sent a heartbeat and given a deadline.
    fn probe_liveness(&mut self) {
        let text = match SyncMessage::Heartbeat.to_json() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to serialize heartbeat: {}", e);
                return;
            }
        };

        let mut failed = Vec::new();
        let mut probed = 0usize;
        for (id, conn) in self.connections.iter_mut() {
            if !conn.is_open() || !conn.alive {
                continue;
            }
            conn.alive = false;
            if conn.channel.send_text(text.clone()).is_err() {
                failed.push(*id);
                continue;
            }
            conn.deadline = Some(self.deadlines.insert(*id, self.config.heartbeat_timeout));
            probed += 1;
        }

        if probed > 0 {
            tracing::debug!(probed, "Sent heartbeats");
        }
        for id in failed {
            self.remove(id, DisconnectReason::DeliveryFailed);
        }
    }

    fn expire(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        // The queue has already released this key
        if conn.deadline.take().is_none() {
            return;
        }
        tracing::warn!(connection_id = %id, "Heartbeat not acknowledged in time");
        self.remove(id, DisconnectReason::LivenessTimeout);
    }

    fn remove(&mut self, id: ConnectionId, reason: DisconnectReason) {
        let Some(conn) = self.connections.remove(&id) else {
            tracing::debug!(connection_id = %id, "Disconnect for unknown connection ignored");
            return;
        };

        if let Some(key) = conn.deadline {
            self.deadlines.try_remove(&key);
        }
        if !conn.channel.is_closed() {
            let (code, text) = reason.close_frame();
            let _ = conn.channel.close(code, text);
        }

        tracing::info!(
            connection_id = %id,
            reason = ?reason,
            lifetime_secs = conn.connected_at.elapsed().as_secs(),
            connections = self.connections.len(),
            "Connection removed"
        );
    }

    fn close_all(&mut self, reason: DisconnectReason) {
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.remove(id, reason);
        }
    }
}
