//! Helpers shared by the unit tests.

use tokio::sync::watch;
use crate::store::{db::DockDb, hash};
use crate::store_manager::StoreHandle;

/// A store thread over a freshly seeded in-memory database
pub(crate) fn spawn_memory_store() -> (StoreHandle, watch::Receiver<String>) {
    let db = DockDb::open(":memory:").unwrap();
    db.seed_if_empty().unwrap();
    let initial = hash::compute_hash(&db.get_all_docks().unwrap());
    let (hash_tx, hash_rx) = watch::channel(initial);
    (StoreHandle::spawn(db, hash_tx), hash_rx)
}
