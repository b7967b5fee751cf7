//! UDP broadcast listener: receives unsolicited controller announcements and
//! turns them into registry observations.

use alloc::sync::Arc;
use core::net::SocketAddr;

use eyre::WrapErr as _;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use broodlink_common::Announcement;

use crate::registry::Registry;

/// A bound announcement socket. Binding is separated from running so that a
/// bind failure is terminal and surfaced to the caller instead of being
/// retried inside a task nobody watches.
pub struct BroadcastListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl BroadcastListener {
    /// Bind the announcement socket on all interfaces with broadcast
    /// reception enabled. Port 0 picks an ephemeral port (used by tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound or configured. This is
    /// fatal to the listener and is not retried here.
    pub async fn bind(port: u16) -> eyre::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .wrap_err(format!("Failed to bind announcement socket on port {port}"))?;
        socket
            .set_broadcast(true)
            .wrap_err("Failed to enable broadcast reception")?;
        let local_addr = socket
            .local_addr()
            .wrap_err("Failed to read bound socket address")?;
        info!("Listening for controller announcements on {local_addr}");
        Ok(Self { socket, local_addr })
    }

    /// The actually bound address (relevant when binding port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive datagrams until cancelled. Individual receive or parse errors
    /// are never fatal; malformed input from an unreliable peer is dropped
    /// and the loop continues. Consumes `self`, so the socket is released on
    /// every exit path.
    pub async fn run(self, registry: Arc<Registry>, cancel: CancellationToken) {
        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Broadcast listener stopping");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, peer_addr)) => {
                            let Some(data) = buf.get(..n) else {
                                continue;
                            };
                            handle_datagram(data, peer_addr, &registry).await;
                        }
                        Err(e) => {
                            warn!("UDP receive error on {}: {e}", self.local_addr);
                        }
                    }
                }
            }
        }
    }
}

/// Classify one datagram and apply it to the registry.
async fn handle_datagram(data: &[u8], peer_addr: SocketAddr, registry: &Registry) {
    match Announcement::classify(data) {
        Ok(Announcement::Heartbeat { heartbeat, ip }) => {
            registry.apply_heartbeat(&heartbeat, &ip).await;
        }
        Ok(Announcement::Discovery {
            device_id,
            ip,
            name,
        }) => {
            registry.apply_discovery(&device_id, &ip, &name).await;
        }
        Err(e) => {
            debug!("Dropping datagram from {peer_addr}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use super::*;
    use crate::persist::DeviceStore;

    async fn test_registry() -> (Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(DeviceStore::new(dir.path())).await.unwrap();
        (registry, dir)
    }

    async fn wait_for_change(rx: &mut crate::registry::ViewRx) {
        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("timed out waiting for a registry update")
            .expect("registry dropped");
    }

    #[tokio::test]
    async fn listener_feeds_discovery_and_survives_garbage() {
        let (registry, _dir) = test_registry().await;
        let listener = BroadcastListener::bind(0).await.unwrap();
        let target = listener.local_addr();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(registry.clone(), cancel.clone()));

        let mut rx = registry.subscribe();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"not json at all", target).await.unwrap();
        sender
            .send_to(
                br#"{"device_id":"dev2","ip":"10.0.0.9","name":"Incubator"}"#,
                target,
            )
            .await
            .unwrap();

        wait_for_change(&mut rx).await;
        let view = registry.current_view();
        assert_eq!(view.discovered.len(), 1);
        assert_eq!(view.discovered[0].id, "dev2");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener did not stop on cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn listener_applies_heartbeats_to_paired_devices() {
        let (registry, _dir) = test_registry().await;
        drop(
            registry
                .pair(crate::device::Device::discovered(
                    "dev1", "10.0.0.4", "Hatchery", 0,
                ))
                .await,
        );

        let listener = BroadcastListener::bind(0).await.unwrap();
        let target = listener.local_addr();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(registry.clone(), cancel.clone()));

        let mut rx = registry.subscribe();
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(br#"{"heartbeat":"dev1","ip":"10.0.0.5"}"#, target)
            .await
            .unwrap();

        wait_for_change(&mut rx).await;
        let view = registry.current_view();
        assert_eq!(view.paired[0].ip, "10.0.0.5");
        assert!(view.paired[0].is_online);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("listener did not stop on cancellation")
            .unwrap();
    }
}
