use std::thread;
use tokio::sync::{mpsc, oneshot, watch};
use anyhow::{Context, Result};
use shared::types::{Dock, DockStatus};
use crate::store::{db::DockDb, hash};

/// Position of a committed write in the store's total write order.
/// Starts at 0 for the seeded state and increases by one per status change.
pub type Revision = u64;

/// Every dock as of one revision
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub revision: Revision,
    pub docks: Vec<Dock>,
}

/// A committed status change
#[derive(Debug, Clone)]
pub struct DockChange {
    pub revision: Revision,
    pub dock: Dock,
}

/// Commands sent to the store thread
pub enum StoreCommand {
    Snapshot(oneshot::Sender<Result<Snapshot>>),
    GetOne(i64, oneshot::Sender<Result<Option<Dock>>>),
    UpdateStatus {
        id: i64,
        status: DockStatus,
        reply: oneshot::Sender<Result<Option<DockChange>>>,
    },
    Shutdown,
}

/// Handle to the thread that owns the dock database
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the store thread. `hash_tx` receives a new digest after every committed change.
    pub fn spawn(db: DockDb, hash_tx: watch::Sender<String>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            let mut revision: Revision = 0;

            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::Snapshot(reply) => {
                        let result = db
                            .get_all_docks()
                            .map(|docks| Snapshot { revision, docks });
                        let _ = reply.send(result);
                    }
                    StoreCommand::GetOne(id, reply) => {
                        let _ = reply.send(db.get_dock(id));
                    }
                    StoreCommand::UpdateStatus { id, status, reply } => {
                        let result = db.update_status(id, status).map(|updated| {
                            updated.map(|dock| {
                                revision += 1;
                                DockChange { revision, dock }
                            })
                        });
                        if matches!(&result, Ok(Some(_))) {
                            match db.get_all_docks() {
                                Ok(docks) => {
                                    let _ = hash_tx.send(hash::compute_hash(&docks));
                                }
                                Err(e) => tracing::error!("Failed to recompute dock hash: {:#}", e),
                            }
                        }
                        let _ = reply.send(result);
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Read every dock along with the revision it reflects
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::Snapshot(reply))
            .await
            .context("Store thread is not running")?;
        rx.await?
    }

    /// Read every dock, ordered by id
    pub async fn list_all(&self) -> Result<Vec<Dock>> {
        Ok(self.snapshot().await?.docks)
    }

    pub async fn get_one(&self, id: i64) -> Result<Option<Dock>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::GetOne(id, reply))
            .await
            .context("Store thread is not running")?;
        rx.await?
    }

    /// Atomically set a dock's status. `Ok(None)` means no dock has this id.
    pub async fn update_status(&self, id: i64, status: DockStatus) -> Result<Option<DockChange>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StoreCommand::UpdateStatus { id, status, reply })
            .await
            .context("Store thread is not running")?;
        rx.await?
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(StoreCommand::Shutdown)
            .await
            .context("Store thread is not running")?;
        Ok(())
    }
}
