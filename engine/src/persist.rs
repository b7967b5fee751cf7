//! Durable device store: the paired-device list and the client identifier,
//! kept as plain files under a small state directory.
//!
//! Writes are best-effort from the registry's point of view: a failed write
//! leaves in-memory state as the source of truth until the next successful
//! persist.

use std::path::{Path, PathBuf};

use eyre::WrapErr as _;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::Device;

const DEVICES_FILE: &str = "devices.json";
const CLIENT_ID_FILE: &str = "client_id";

/// On-disk layout of one paired device. The field names are a stored
/// contract shared with earlier releases and must not change.
#[derive(Debug, Serialize, Deserialize)]
struct SavedDevice {
    id: String,
    ip: String,
    name: String,
    #[serde(rename = "isOnline", default)]
    is_online: bool,
    #[serde(rename = "lastSeen", default)]
    last_seen: u64,
}

impl From<&Device> for SavedDevice {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            ip: device.ip.clone(),
            name: device.name.clone(),
            is_online: device.is_online,
            last_seen: device.last_seen,
        }
    }
}

impl From<SavedDevice> for Device {
    fn from(saved: SavedDevice) -> Self {
        Self {
            id: saved.id,
            ip: saved.ip,
            name: saved.name,
            is_online: saved.is_online,
            last_seen: saved.last_seen,
            // Telemetry is not persisted; it refills from the next
            // heartbeat/poll cycle.
            telemetry: broodlink_common::TelemetryReport::default(),
        }
    }
}

/// File-backed store for the paired set and the client identifier.
#[derive(Debug, Clone)]
pub struct DeviceStore {
    state_dir: PathBuf,
}

impl DeviceStore {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    fn devices_path(&self) -> PathBuf {
        self.state_dir.join(DEVICES_FILE)
    }

    fn client_id_path(&self) -> PathBuf {
        self.state_dir.join(CLIENT_ID_FILE)
    }

    /// Create the state directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub async fn ensure_dir(&self) -> eyre::Result<()> {
        fs::create_dir_all(&self.state_dir).await.wrap_err(format!(
            "Failed to create state directory at: {}",
            self.state_dir.display()
        ))
    }

    /// Load the persisted paired-device list. A missing file is an empty set,
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load_devices(&self) -> eyre::Result<Vec<Device>> {
        let path = self.devices_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No device list at {}, starting empty", path.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(e)
                    .wrap_err(format!("Failed to read device list at: {}", path.display()));
            }
        };
        let saved: Vec<SavedDevice> = serde_json::from_str(&content).wrap_err(format!(
            "Failed to parse device list at: {}",
            path.display()
        ))?;
        Ok(saved.into_iter().map(Device::from).collect())
    }

    /// Replace the persisted paired-device list with `devices`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the file write fails.
    pub async fn save_devices(&self, devices: &[Device]) -> eyre::Result<()> {
        let saved: Vec<SavedDevice> = devices.iter().map(SavedDevice::from).collect();
        let content = serde_json::to_string(&saved).wrap_err("Failed to serialize device list")?;
        let path = self.devices_path();
        fs::write(&path, content).await.wrap_err(format!(
            "Failed to write device list at: {}",
            path.display()
        ))
    }

    /// Load the stable client identifier, generating and persisting a fresh
    /// one on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier file cannot be read or written.
    pub async fn client_id(&self) -> eyre::Result<String> {
        let path = self.client_id_path();
        match fs::read_to_string(&path).await {
            Ok(id) => {
                let id = id.trim().to_string();
                if !id.is_empty() {
                    return Ok(id);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).wrap_err(format!(
                    "Failed to read client identifier at: {}",
                    path.display()
                ));
            }
        }
        let id = Uuid::new_v4().to_string();
        fs::write(&path, &id).await.wrap_err(format!(
            "Failed to write client identifier at: {}",
            path.display()
        ))?;
        info!("Generated new client identifier");
        Ok(id)
    }
}
