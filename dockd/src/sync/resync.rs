use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::store_manager::StoreHandle;
use crate::sync::broadcast::Broadcaster;

/// Periodic full sync loop: every `every`, read the store and send `full_sync`
/// to all open connections. A failed read skips that round.
pub async fn run(
    store: StoreHandle,
    broadcaster: Broadcaster,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match store.snapshot().await {
                    Ok(snapshot) => {
                        let report = broadcaster.full_sync(snapshot).await;
                        tracing::debug!(
                            delivered = report.delivered,
                            failed = report.failed.len(),
                            "Periodic full sync sent"
                        );
                    }
                    Err(e) => tracing::error!("Skipping periodic full sync: {:#}", e),
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Periodic full sync shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::SyncMessage;
    use crate::sync::channel::{ConnectionChannel, Outbound};
    use crate::sync::registry::{RegistryConfig, RegistryHandle};
    use crate::testing::spawn_memory_store;

    #[tokio::test]
    async fn test_sends_full_sync_each_interval() {
        let (store, _hash_rx) = spawn_memory_store();
        let registry = RegistryHandle::spawn(RegistryConfig {
            max_connections: 10,
            heartbeat_interval: Duration::from_secs(3600),
            heartbeat_timeout: Duration::from_secs(10),
        });
        let (channel, mut rx) = ConnectionChannel::new();
        let id = registry.connect(channel).await.unwrap();
        registry.open(id, store.snapshot().await.unwrap()).await.unwrap();
        rx.try_recv().unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            store.clone(),
            Broadcaster::new(registry.clone()),
            Duration::from_millis(50),
            cancel.clone(),
        ));

        for _ in 0..2 {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
            match frame {
                Some(Outbound::Text(text)) => match SyncMessage::parse(&text).unwrap() {
                    SyncMessage::FullSync { docks, .. } => assert_eq!(docks.len(), 24),
                    other => panic!("expected full_sync, got {:?}", other),
                },
                other => panic!("expected text frame, got {:?}", other),
            }
        }

        cancel.cancel();
        task.await.unwrap();
    }
}
