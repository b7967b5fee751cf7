//! The reconciliation registry: the single authoritative view of which
//! controllers exist, whether they are reachable, and their latest telemetry.
//!
//! Two id-keyed sets live behind one write-serializing [`Mutex`]: the paired
//! set (persisted) and the transient discovered set. The broadcast listener,
//! health poller, pairing client and user commands all mutate state through
//! the per-operation methods here and nowhere else; every mutation publishes
//! a fresh snapshot to a [`watch`] channel so readers never lock anything.

use alloc::sync::Arc;
use core::time::Duration;
use std::collections::HashMap;

use broodlink_common::TelemetryReport;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::{
    device::{Device, ObservationSource, now_millis},
    persist::DeviceStore,
};

/// Read-side snapshot of both device sets.
///
/// `discovered` never contains an identifier present in `paired`; the filter
/// is applied when the snapshot is built, as a second line of defense on top
/// of the mutation rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceView {
    pub paired: Vec<Device>,
    pub discovered: Vec<Device>,
}

/// Watch channel receiver for registry snapshots.
pub type ViewRx = watch::Receiver<Arc<DeviceView>>;

#[derive(Debug, Default)]
struct Sets {
    paired: HashMap<String, Device>,
    discovered: HashMap<String, Device>,
}

/// Serialized device state: writes go through the inner [`Mutex`], reads go
/// through published [`watch`] snapshots.
pub struct Registry {
    inner: Mutex<Sets>,
    tx: watch::Sender<Arc<DeviceView>>,
    store: DeviceStore,
}

fn snapshot(sets: &Sets) -> Arc<DeviceView> {
    let mut paired: Vec<Device> = sets.paired.values().cloned().collect();
    paired.sort_by(|a, b| a.id.cmp(&b.id));
    let mut discovered: Vec<Device> = sets
        .discovered
        .values()
        .filter(|device| !sets.paired.contains_key(&device.id))
        .cloned()
        .collect();
    discovered.sort_by(|a, b| a.id.cmp(&b.id));
    Arc::new(DeviceView { paired, discovered })
}

fn threshold_millis(threshold: Duration) -> u64 {
    u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX)
}

impl Registry {
    /// Create a registry seeded from the persisted paired-device list.
    ///
    /// # Errors
    ///
    /// Returns an error if the persisted device list exists but cannot be
    /// read or parsed.
    pub async fn load(store: DeviceStore) -> eyre::Result<Arc<Self>> {
        let devices = store.load_devices().await?;
        info!("Loaded {} paired device(s) from storage", devices.len());
        let paired: HashMap<String, Device> = devices
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();
        let sets = Sets {
            paired,
            discovered: HashMap::new(),
        };
        let (tx, _) = watch::channel(snapshot(&sets));
        Ok(Arc::new(Self {
            inner: Mutex::new(sets),
            tx,
            store,
        }))
    }

    /// Persist the paired set while still holding the write lock, so file
    /// writes are serialized with mutations. Best-effort: failures are
    /// logged, in-memory state stays authoritative.
    async fn persist_paired(&self, sets: &Sets) {
        let mut devices: Vec<Device> = sets.paired.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        if let Err(e) = self.store.save_devices(&devices).await {
            warn!("Failed to persist device list: {e:#}");
        }
    }

    fn publish(&self, sets: &Sets) {
        drop(self.tx.send_replace(snapshot(sets)));
    }

    /// Apply a heartbeat observation. No-op unless `id` is paired; otherwise
    /// refreshes address/online/timestamp, persisting only when the address
    /// actually changed.
    pub async fn apply_heartbeat(&self, id: &str, ip: &str) {
        let mut sets = self.inner.lock().await;
        let Some(device) = sets.paired.get_mut(id) else {
            debug!(
                source = ?ObservationSource::Heartbeat,
                "Heartbeat for unpaired device '{id}', ignoring"
            );
            return;
        };
        let ip_changed = device.ip != ip;
        if ip_changed {
            info!("Device '{id}' moved from {} to {ip}", device.ip);
            device.ip = ip.to_string();
        }
        device.is_online = true;
        device.last_seen = now_millis();
        if ip_changed {
            self.persist_paired(&sets).await;
        }
        self.publish(&sets);
    }

    /// Apply a discovery announcement. A paired controller that (mistakenly)
    /// announces itself with the discovery shape is treated purely as a
    /// heartbeat; it never re-enters the discovered set.
    pub async fn apply_discovery(&self, id: &str, ip: &str, name: &str) {
        let mut sets = self.inner.lock().await;
        if sets.paired.contains_key(id) {
            debug!(
                source = ?ObservationSource::DiscoveryBroadcast,
                "Discovery announcement from paired device '{id}', treating as heartbeat"
            );
            drop(sets);
            self.apply_heartbeat(id, ip).await;
            return;
        }
        let now = now_millis();
        match sets.discovered.get_mut(id) {
            Some(existing) => {
                existing.ip = ip.to_string();
                existing.name = name.to_string();
                existing.last_seen = now;
            }
            None => {
                debug!(
                    source = ?ObservationSource::DiscoveryBroadcast,
                    "Discovered new device '{id}' at {ip}"
                );
                drop(
                    sets.discovered
                        .insert(id.to_string(), Device::discovered(id, ip, name, now)),
                );
            }
        }
        self.publish(&sets);
    }

    /// Move a device into the paired set, removing any discovered entry with
    /// the same identifier in the same logical update. Persisted.
    ///
    /// Returns the stored record.
    pub async fn pair(&self, device: Device) -> Device {
        let mut sets = self.inner.lock().await;
        drop(sets.discovered.remove(&device.id));
        let stored = device.clone();
        drop(sets.paired.insert(device.id.clone(), device));
        self.persist_paired(&sets).await;
        self.publish(&sets);
        stored
    }

    /// Mark a paired device online with a fresh timestamp and persist the
    /// new state. Used when a pairing round-trip is confirmed.
    pub async fn mark_online(&self, id: &str) {
        let mut sets = self.inner.lock().await;
        let Some(device) = sets.paired.get_mut(id) else {
            return;
        };
        device.is_online = true;
        device.last_seen = now_millis();
        self.persist_paired(&sets).await;
        self.publish(&sets);
    }

    /// Rename a paired device. Returns `false` when the id is unknown.
    pub async fn rename(&self, id: &str, new_name: &str) -> bool {
        let mut sets = self.inner.lock().await;
        let Some(device) = sets.paired.get_mut(id) else {
            return false;
        };
        device.name = new_name.to_string();
        self.persist_paired(&sets).await;
        self.publish(&sets);
        true
    }

    /// Remove a device from the paired set and from persistence. Returns
    /// `false` when the id is unknown.
    pub async fn unpair(&self, id: &str) -> bool {
        let mut sets = self.inner.lock().await;
        if sets.paired.remove(id).is_none() {
            return false;
        }
        self.persist_paired(&sets).await;
        self.publish(&sets);
        true
    }

    /// Apply a successful health-query result: fresh telemetry, online,
    /// observed now. In-memory only; liveness flapping is not worth a disk
    /// write per poll cycle.
    pub async fn apply_poll_success(&self, id: &str, report: TelemetryReport, now: u64) {
        let mut sets = self.inner.lock().await;
        let Some(device) = sets.paired.get_mut(id) else {
            debug!(
                source = ?ObservationSource::PollResponse,
                "Poll result for unpaired device '{id}', ignoring"
            );
            return;
        };
        device.telemetry = report;
        device.is_online = true;
        device.last_seen = now;
        self.publish(&sets);
    }

    /// Mark a paired device offline after a failed health query. The last
    /// telemetry snapshot stays intact ("last known", never cleared).
    pub async fn mark_offline(&self, id: &str) {
        let mut sets = self.inner.lock().await;
        let Some(device) = sets.paired.get_mut(id) else {
            return;
        };
        if device.is_online {
            info!("Device '{id}' is now offline");
        }
        device.is_online = false;
        self.publish(&sets);
    }

    /// Paired devices whose last observation is older than `threshold`,
    /// candidates for an active health query.
    pub async fn stale_paired(&self, now: u64, threshold: Duration) -> Vec<Device> {
        let sets = self.inner.lock().await;
        sets.paired
            .values()
            .filter(|device| now.saturating_sub(device.last_seen) > threshold_millis(threshold))
            .cloned()
            .collect()
    }

    /// Evict discovered entries older than `threshold`. Returns how many
    /// entries were removed.
    pub async fn evict_stale_discovered(&self, now: u64, threshold: Duration) -> usize {
        let mut sets = self.inner.lock().await;
        let before = sets.discovered.len();
        sets.discovered
            .retain(|_, device| now.saturating_sub(device.last_seen) <= threshold_millis(threshold));
        let evicted = before - sets.discovered.len();
        if evicted > 0 {
            self.publish(&sets);
        }
        evicted
    }

    /// Drop all transient discovery state. The paired set is unaffected.
    pub async fn clear_discovered(&self) {
        let mut sets = self.inner.lock().await;
        if sets.discovered.is_empty() {
            return;
        }
        sets.discovered.clear();
        self.publish(&sets);
    }

    /// Current snapshot, cheap and lock-free.
    #[must_use]
    pub fn current_view(&self) -> Arc<DeviceView> {
        self.tx.borrow().clone()
    }

    /// Subscribe to future snapshot changes.
    #[must_use]
    pub fn subscribe(&self) -> ViewRx {
        self.tx.subscribe()
    }

    /// Look up a paired device by identifier.
    pub async fn paired_device(&self, id: &str) -> Option<Device> {
        let sets = self.inner.lock().await;
        sets.paired.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DEFAULT_PAIRED_NAME;

    async fn fresh_registry() -> (Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(DeviceStore::new(dir.path())).await.unwrap();
        (registry, dir)
    }

    fn paired_seed(id: &str, ip: &str) -> Device {
        Device {
            id: id.to_string(),
            ip: ip.to_string(),
            name: DEFAULT_PAIRED_NAME.to_string(),
            is_online: false,
            last_seen: 0,
            telemetry: TelemetryReport::default(),
        }
    }

    #[tokio::test]
    async fn heartbeat_for_unpaired_id_is_a_no_op() {
        let (registry, _dir) = fresh_registry().await;
        let before = registry.current_view();
        registry.apply_heartbeat("ghost", "10.0.0.1").await;
        assert_eq!(*registry.current_view(), *before);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_address_and_persists_exactly_once() {
        let (registry, dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);

        registry.apply_heartbeat("dev1", "10.0.0.5").await;
        let view = registry.current_view();
        assert_eq!(view.paired[0].ip, "10.0.0.5");
        assert!(view.paired[0].is_online);
        let raw = std::fs::read_to_string(dir.path().join("devices.json")).unwrap();
        assert!(raw.contains("10.0.0.5"));

        // Same address again: no redundant persist. Removing the file and
        // re-applying proves the write path is not taken.
        std::fs::remove_file(dir.path().join("devices.json")).unwrap();
        registry.apply_heartbeat("dev1", "10.0.0.5").await;
        assert!(!dir.path().join("devices.json").exists());
    }

    #[tokio::test]
    async fn heartbeat_is_idempotent_modulo_timestamp() {
        let (registry, _dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);
        registry.apply_heartbeat("dev1", "10.0.0.5").await;
        let first = registry.current_view();
        registry.apply_heartbeat("dev1", "10.0.0.5").await;
        let second = registry.current_view();
        let (a, b) = (&first.paired[0], &second.paired[0]);
        assert_eq!(a.id, b.id);
        assert_eq!(a.ip, b.ip);
        assert_eq!(a.name, b.name);
        assert_eq!(a.is_online, b.is_online);
        assert_eq!(a.telemetry, b.telemetry);
        assert!(b.last_seen >= a.last_seen);
    }

    #[tokio::test]
    async fn discovery_upserts_and_suppresses_duplicates() {
        let (registry, _dir) = fresh_registry().await;
        registry
            .apply_discovery("dev2", "10.0.0.9", "Incubator")
            .await;
        registry
            .apply_discovery("dev2", "10.0.0.10", "Incubator A")
            .await;
        let view = registry.current_view();
        assert_eq!(view.discovered.len(), 1);
        assert_eq!(view.discovered[0].ip, "10.0.0.10");
        assert_eq!(view.discovered[0].name, "Incubator A");
    }

    #[tokio::test]
    async fn discovery_for_paired_id_never_reenters_discovered() {
        let (registry, _dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);
        registry.apply_discovery("dev1", "10.0.0.6", "Imposter").await;
        let view = registry.current_view();
        assert!(view.discovered.is_empty());
        // treated as heartbeat: address refreshed, online
        assert_eq!(view.paired[0].ip, "10.0.0.6");
        assert!(view.paired[0].is_online);
        // name untouched by the discovery shape
        assert_eq!(view.paired[0].name, DEFAULT_PAIRED_NAME);
    }

    #[tokio::test]
    async fn pairing_migrates_discovered_entry_in_one_update() {
        let (registry, dir) = fresh_registry().await;
        registry
            .apply_discovery("dev2", "10.0.0.9", "Incubator")
            .await;
        let discovered = registry.current_view().discovered[0].clone();

        drop(registry.pair(discovered).await);
        let view = registry.current_view();
        assert_eq!(view.paired.len(), 1);
        assert_eq!(view.paired[0].id, "dev2");
        assert!(view.discovered.is_empty());
        let raw = std::fs::read_to_string(dir.path().join("devices.json")).unwrap();
        assert!(raw.contains("dev2"));
    }

    #[tokio::test]
    async fn no_identifier_ever_appears_in_both_lists() {
        let (registry, _dir) = fresh_registry().await;
        registry
            .apply_discovery("dev2", "10.0.0.9", "Incubator")
            .await;
        drop(registry.pair(paired_seed("dev2", "10.0.0.9")).await);
        registry.apply_discovery("dev2", "10.0.0.9", "Incubator").await;
        let view = registry.current_view();
        let in_both = view
            .paired
            .iter()
            .any(|p| view.discovered.iter().any(|d| d.id == p.id));
        assert!(!in_both);
    }

    #[tokio::test]
    async fn staleness_selector_uses_strict_threshold() {
        let (registry, _dir) = fresh_registry().await;
        let mut fresh = paired_seed("fresh", "10.0.0.2");
        fresh.last_seen = 100_000;
        let mut quiet = paired_seed("quiet", "10.0.0.3");
        quiet.last_seen = 80_000;
        drop(registry.pair(fresh).await);
        drop(registry.pair(quiet).await);

        // At exactly the threshold the device is still trusted.
        let now = 112_000;
        let stale = registry.stale_paired(now, Duration::from_secs(12)).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "quiet");
    }

    #[tokio::test]
    async fn stale_discovered_entries_are_evicted() {
        let (registry, _dir) = fresh_registry().await;
        registry.apply_discovery("dev2", "10.0.0.9", "A").await;
        let now = now_millis();
        let evicted = registry
            .evict_stale_discovered(now + 15_001, Duration::from_secs(15))
            .await;
        assert_eq!(evicted, 1);
        assert!(registry.current_view().discovered.is_empty());

        registry.apply_discovery("dev3", "10.0.0.8", "B").await;
        let kept = registry
            .evict_stale_discovered(now_millis(), Duration::from_secs(15))
            .await;
        assert_eq!(kept, 0);
        assert_eq!(registry.current_view().discovered.len(), 1);
    }

    #[tokio::test]
    async fn network_change_clears_discovered_only() {
        let (registry, _dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);
        registry.apply_discovery("dev2", "10.0.0.9", "A").await;
        registry.apply_discovery("dev3", "10.0.0.8", "B").await;

        registry.clear_discovered().await;
        let view = registry.current_view();
        assert!(view.discovered.is_empty());
        assert_eq!(view.paired.len(), 1);
    }

    #[tokio::test]
    async fn rename_and_unpair_hit_persistence() {
        let (registry, dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);

        assert!(registry.rename("dev1", "Left shelf").await);
        let raw = std::fs::read_to_string(dir.path().join("devices.json")).unwrap();
        assert!(raw.contains("Left shelf"));

        assert!(registry.unpair("dev1").await);
        assert!(!registry.unpair("dev1").await);
        let raw = std::fs::read_to_string(dir.path().join("devices.json")).unwrap();
        assert_eq!(raw, "[]");
        assert!(registry.current_view().paired.is_empty());
    }

    #[tokio::test]
    async fn offline_transition_keeps_last_telemetry() {
        let (registry, _dir) = fresh_registry().await;
        drop(registry.pair(paired_seed("dev1", "10.0.0.4")).await);
        let report = TelemetryReport {
            temperature: 37.7,
            humidity: 60.0,
            light_state: true,
            fan_state: false,
            humidifier_state: true,
        };
        registry.apply_poll_success("dev1", report, now_millis()).await;
        registry.mark_offline("dev1").await;
        let view = registry.current_view();
        assert!(!view.paired[0].is_online);
        assert_eq!(view.paired[0].telemetry, report);
    }
}
