//! Dock model and sync-protocol vocabulary shared by the daemon and its clients.

pub mod protocol;
pub mod types;
