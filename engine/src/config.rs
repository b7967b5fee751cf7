//! Engine configuration: ports, liveness thresholds, and storage location.
//!
//! Every field has a default matching the reference controller firmware, so
//! an empty (or absent) config file yields a working engine.

use core::time::Duration;
use std::path::{Path, PathBuf};

use eyre::WrapErr as _;
use serde::Deserialize;
use tokio::fs;

/// Top-level engine configuration, loaded from a TOML file.
#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Ports used to reach controllers.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// UDP port the listener binds on all interfaces for announcements.
    #[serde(default = "default_broadcast_port")]
    pub broadcast_port: u16,
    /// TCP port of the controllers' HTTP endpoints (`/data`, `/pair`).
    #[serde(default = "default_device_port")]
    pub device_port: u16,
}

/// Liveness timing knobs. All values are in seconds.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Period of the health poller.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Age beyond which a paired device's heartbeats count as gone quiet and
    /// the device becomes subject to active polling.
    #[serde(default = "default_heartbeat_staleness_secs")]
    pub heartbeat_staleness_secs: u64,
    /// Age beyond which a discovered (unpaired) entry is evicted.
    #[serde(default = "default_discovery_staleness_secs")]
    pub discovery_staleness_secs: u64,
    /// Bound on each outbound health/pairing request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Where the engine keeps its durable state.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding the paired-device list and the client identifier.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl TimingConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    #[must_use]
    pub fn heartbeat_staleness(&self) -> Duration {
        Duration::from_secs(self.heartbeat_staleness_secs)
    }

    #[must_use]
    pub fn discovery_staleness(&self) -> Duration {
        Duration::from_secs(self.discovery_staleness_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_broadcast_port() -> u16 {
    broodlink_common::DEFAULT_BROADCAST_PORT
}

fn default_device_port() -> u16 {
    broodlink_common::DEFAULT_DEVICE_PORT
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_heartbeat_staleness_secs() -> u64 {
    12
}

fn default_discovery_staleness_secs() -> u64 {
    15
}

fn default_request_timeout_secs() -> u64 {
    4
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("broodlink_state")
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broadcast_port: default_broadcast_port(),
            device_port: default_device_port(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            heartbeat_staleness_secs: default_heartbeat_staleness_secs(),
            discovery_staleness_secs: default_discovery_staleness_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
        }
    }
}

/// Reads and parses the engine config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<EngineConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(&path).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: EngineConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}
