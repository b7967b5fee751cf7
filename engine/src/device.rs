//! Device records and observation metadata used throughout the engine.

use core::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use broodlink_common::TelemetryReport;

/// Name assigned to a controller when the user pairs it. Renames come later.
pub const DEFAULT_PAIRED_NAME: &str = "My Incubator";

/// A single incubator controller as known to this client.
///
/// The identifier is assigned by the controller firmware and is immutable;
/// the address is not part of identity and may change across observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: String,
    pub ip: String,
    pub name: String,
    pub is_online: bool,
    /// Wall-clock timestamp (epoch millis) of the last observation for this
    /// device, from any source.
    pub last_seen: u64,
    /// Latest telemetry sample. Kept as "last known" when the device goes
    /// offline, never cleared.
    pub telemetry: TelemetryReport,
}

impl Device {
    /// A freshly discovered, not-yet-paired controller.
    #[must_use]
    pub fn discovered(id: &str, ip: &str, name: &str, now: u64) -> Self {
        Self {
            id: id.to_string(),
            ip: ip.to_string(),
            name: name.to_string(),
            is_online: false,
            last_seen: now,
            telemetry: TelemetryReport::default(),
        }
    }

    /// Age of the last observation relative to `now`, saturating at zero for
    /// timestamps from the future (clock adjustments).
    #[must_use]
    pub fn observed_age(&self, now: u64) -> Duration {
        Duration::from_millis(now.saturating_sub(self.last_seen))
    }
}

/// Which signal source produced an observation. Used for log attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationSource {
    Heartbeat,
    DiscoveryBroadcast,
    PollResponse,
}

/// Current wall-clock time as epoch millis, the unit `last_seen` is stored in.
///
/// Wall-clock (not monotonic) time is deliberate: `last_seen` is persisted
/// and must stay meaningful across restarts.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}
