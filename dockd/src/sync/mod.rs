//! Real-time sync: connection registry, fan-out and the message protocol.

pub mod broadcast;
pub mod channel;
pub mod protocol;
pub mod registry;
pub mod resync;

pub use broadcast::{Broadcaster, DeliveryReport};
pub use channel::{ConnectionChannel, ConnectionId, Outbound};
pub use registry::{DisconnectReason, RegistryConfig, RegistryError, RegistryHandle};
