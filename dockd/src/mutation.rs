//! Status changes: persist, invalidate the cache, then announce.

use std::sync::Arc;
use shared::protocol::ALL_DOCKS_KEY;
use shared::types::{Dock, DockStatus};
use crate::cache::DockCache;
use crate::store_manager::StoreHandle;
use crate::sync::Broadcaster;

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("dock {0} not found")]
    NotFound(i64),
    #[error("store failure: {0:#}")]
    Store(anyhow::Error),
}

/// Applies dock status changes.
///
/// The order is fixed: the write commits, the cached list is dropped, and only
/// then is `dock_updated` broadcast. A failed or missing write broadcasts nothing.
#[derive(Clone)]
pub struct DockMutator {
    store: StoreHandle,
    cache: Arc<DockCache>,
    broadcaster: Broadcaster,
}

impl DockMutator {
    pub fn new(store: StoreHandle, cache: Arc<DockCache>, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            cache,
            broadcaster,
        }
    }

    pub async fn set_status(&self, id: i64, status: DockStatus) -> Result<Dock, MutationError> {
        let change = self
            .store
            .update_status(id, status)
            .await
            .map_err(MutationError::Store)?
            .ok_or(MutationError::NotFound(id))?;

        self.cache.invalidate(ALL_DOCKS_KEY);

        let dock = change.dock.clone();
        let report = self.broadcaster.dock_updated(change).await;
        tracing::info!(
            dock_id = id,
            dock = %dock.label(),
            status = %status,
            delivered = report.delivered,
            "Dock status updated"
        );
        Ok(dock)
    }
}
