use std::fmt;
use tokio::sync::mpsc;

/// Registry-assigned identity of one client connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A frame queued for the transport's writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// The transport has gone away; nothing more can be sent on this channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection channel closed")]
pub struct ChannelClosed;

/// Sending half of a client connection.
///
/// The transport owns the receiving half and writes frames to the socket in
/// the order they were queued. Once the writer exits, every send fails.
#[derive(Debug, Clone)]
pub struct ConnectionChannel {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send_text(&self, text: String) -> Result<(), ChannelClosed> {
        self.tx.send(Outbound::Text(text)).map_err(|_| ChannelClosed)
    }

    /// Queue a close frame. The writer stops after sending it.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ChannelClosed> {
        self.tx
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
