pub mod api;
pub mod cache;
pub mod config;
pub mod mutation;
pub mod store;
pub mod store_manager;
pub mod sync;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use crate::cache::DockCache;
use crate::config::Config;
use crate::mutation::DockMutator;
use crate::store::db::DockDb;
use crate::store_manager::StoreHandle;
use crate::sync::{Broadcaster, RegistryConfig, RegistryHandle};

/// The running service: store thread, registry task and periodic sync task,
/// plus the router state wired to them.
pub struct Service {
    pub state: api::routes::AppState,
    resync: Option<tokio::task::JoinHandle<()>>,
}

impl Service {
    /// Open and seed the store, then start every background task
    pub fn start(config: &Config, cancel: CancellationToken) -> Result<Self> {
        config.validate().context("Invalid configuration")?;

        let db = DockDb::open(&config.store.db_path)?;
        tracing::info!("Opened database at {:?}", config.store.db_path);

        db.seed_if_empty()?;

        let initial_docks = db.get_all_docks()?;
        let initial_hash = store::hash::compute_hash(&initial_docks);
        tracing::info!(docks = initial_docks.len(), "Initial dock hash: {}", initial_hash);

        let (hash_tx, hash_rx) = watch::channel(initial_hash);
        let store = StoreHandle::spawn(db, hash_tx);

        let registry = RegistryHandle::spawn(RegistryConfig::from(&config.sync));
        let broadcaster = Broadcaster::new(registry.clone());
        let cache = Arc::new(DockCache::new(config.cache.ttl()));
        let mutator = DockMutator::new(store.clone(), cache.clone(), broadcaster.clone());

        let resync = config.sync.full_sync_interval().map(|every| {
            tracing::info!("Periodic full sync every {}s", every.as_secs());
            tokio::spawn(sync::resync::run(store.clone(), broadcaster.clone(), every, cancel))
        });

        Ok(Self {
            state: api::routes::AppState {
                store,
                cache,
                registry,
                mutator,
                hash_rx,
            },
            resync,
        })
    }

    pub fn router(&self) -> axum::Router {
        api::routes::router(self.state.clone())
    }

    /// Close every connection and stop the store thread. Expects the
    /// cancellation token passed to [`Service::start`] to be cancelled.
    pub async fn shutdown(self) {
        if let Some(resync) = self.resync {
            let _ = resync.await;
        }

        self.state.registry.shutdown().await;

        if let Err(e) = self.state.store.shutdown().await {
            tracing::error!("Failed to shutdown store: {}", e);
        }
    }
}
