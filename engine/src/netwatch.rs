//! Network-change monitor: discards transient discovery state whenever the
//! active network path changes.
//!
//! Discovery broadcasts are scoped to one local segment; entries learned on a
//! previous network are meaningless after roaming and would be misleading to
//! show. The OS-level hookup is the embedder's job; the engine only exposes
//! the channel these transitions arrive on.

use alloc::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::Registry;

/// Reachability of the active network interface as reported by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Available,
    Lost,
}

/// React to network transitions until cancelled or the sender is dropped.
/// Every transition (gained or lost) clears the discovered set
/// unconditionally; the paired set is never touched.
pub async fn run_network_monitor(
    mut network_rx: watch::Receiver<NetworkState>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("Network monitor stopping");
                break;
            }
            changed = network_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *network_rx.borrow_and_update();
                info!("Network transition ({state:?}), clearing discovered devices");
                registry.clear_discovered().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::device::Device;
    use crate::persist::DeviceStore;

    #[tokio::test]
    async fn transitions_clear_discovered_but_not_paired() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(DeviceStore::new(dir.path())).await.unwrap();
        drop(
            registry
                .pair(Device::discovered("dev1", "10.0.0.4", "Hatchery", 0))
                .await,
        );
        registry.apply_discovery("dev2", "10.0.0.9", "A").await;
        registry.apply_discovery("dev3", "10.0.0.8", "B").await;

        let (network_tx, network_rx) = watch::channel(NetworkState::Available);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_network_monitor(
            network_rx,
            registry.clone(),
            cancel.clone(),
        ));

        let mut view_rx = registry.subscribe();
        network_tx.send(NetworkState::Lost).unwrap();
        tokio::time::timeout(Duration::from_secs(5), view_rx.changed())
            .await
            .expect("timed out waiting for discovered set to clear")
            .unwrap();

        let view = registry.current_view();
        assert!(view.discovered.is_empty());
        assert_eq!(view.paired.len(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("monitor did not stop on cancellation")
            .unwrap();
    }
}
