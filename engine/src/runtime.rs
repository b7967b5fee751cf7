//! Engine wiring: constructs the shared registry, spawns the background
//! tasks, and supervises their shutdown.

use alloc::sync::Arc;
use core::net::SocketAddr;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, info, warn};

use crate::{
    config::EngineConfig,
    listener::BroadcastListener,
    netwatch::{NetworkState, run_network_monitor},
    pairing::PairingClient,
    persist::DeviceStore,
    poller::HealthPoller,
    registry::{Registry, ViewRx},
};

/// A running engine: the broadcast listener, health poller and network
/// monitor tasks plus the shared registry they feed.
///
/// Tasks hold an explicit reference to the registry they were constructed
/// with; there are no ambient singletons. Dropping the engine without calling
/// [`Engine::shutdown`] aborts nothing — call shutdown to get the synchronous
/// release of the announcement socket.
pub struct Engine {
    registry: Arc<Registry>,
    pairing: PairingClient,
    network_tx: watch::Sender<NetworkState>,
    broadcast_addr: SocketAddr,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Load persisted state and start all background tasks.
    ///
    /// # Errors
    ///
    /// Returns an error for startup faults that are terminal by design:
    /// an unusable state directory, an unreadable device list, or a failed
    /// socket bind. None of these are retried automatically.
    pub async fn start(config: EngineConfig) -> eyre::Result<Self> {
        let store = DeviceStore::new(&config.storage.state_dir);
        store.ensure_dir().await?;
        let client_id = store.client_id().await?;
        let registry = Registry::load(store).await?;

        let listener = BroadcastListener::bind(config.network.broadcast_port).await?;
        let broadcast_addr = listener.local_addr();
        let poller = HealthPoller::new(
            &config.timing,
            config.network.device_port,
            registry.clone(),
        )?;
        let pairing = PairingClient::new(&config.timing, config.network.device_port, client_id)?;

        let (network_tx, network_rx) = watch::channel(NetworkState::Available);
        let cancel = CancellationToken::new();

        let tasks = vec![
            tokio::spawn(
                listener
                    .run(registry.clone(), cancel.clone())
                    .in_current_span(),
            ),
            tokio::spawn(poller.run(cancel.clone()).in_current_span()),
            tokio::spawn(
                run_network_monitor(network_rx, registry.clone(), cancel.clone())
                    .in_current_span(),
            ),
        ];

        info!("Engine started");
        Ok(Self {
            registry,
            pairing,
            network_tx,
            broadcast_addr,
            cancel,
            tasks,
        })
    }

    /// The shared reconciliation registry. The presentation layer reads views
    /// from here and issues rename/unpair through it.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Client for claiming discovered controllers.
    #[must_use]
    pub fn pairing(&self) -> &PairingClient {
        &self.pairing
    }

    /// Sender the embedder feeds OS network transitions into.
    #[must_use]
    pub fn network_sender(&self) -> watch::Sender<NetworkState> {
        self.network_tx.clone()
    }

    /// Address the announcement socket actually bound (port 0 resolves here).
    #[must_use]
    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    /// Subscribe to registry snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> ViewRx {
        self.registry.subscribe()
    }

    /// Cancel all background tasks and wait for them to finish, guaranteeing
    /// the announcement socket is released before this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {e}");
            }
        }
        info!("Engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, NetworkConfig, StorageConfig};

    #[tokio::test]
    async fn shutdown_releases_the_announcement_socket() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            network: NetworkConfig {
                broadcast_port: 0,
                ..NetworkConfig::default()
            },
            storage: StorageConfig {
                state_dir: dir.path().to_path_buf(),
            },
            ..EngineConfig::default()
        };
        let engine = Engine::start(config).await.unwrap();
        let addr = engine.broadcast_addr();
        engine.shutdown().await;

        // The port must be immediately rebindable after shutdown.
        let rebound = BroadcastListener::bind(addr.port()).await;
        assert!(rebound.is_ok(), "socket was not released on shutdown");
    }
}
