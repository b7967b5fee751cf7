//! Announcement datagrams and HTTP body types for controller communication.
//!
//! Controllers broadcast small UTF-8 JSON datagrams on the LAN. A datagram is
//! classified into exactly one shape *before* any field is used; anything
//! that matches neither shape is an error the caller drops and logs.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// A single announcement datagram, decoded into exactly one of the two
/// recognized shapes.
///
/// The variants are tried in declaration order, so a packet that carries both
/// a `heartbeat` and a `device_id` field counts as a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Announcement {
    /// Lightweight liveness proof from an already-paired controller:
    /// `{"heartbeat": <device id>, "ip": <address>}`.
    Heartbeat { heartbeat: String, ip: String },
    /// Self-advertisement from an unpaired controller:
    /// `{"device_id": <id>, "ip": <address>, "name": <proposed name>}`.
    Discovery {
        device_id: String,
        ip: String,
        name: String,
    },
}

/// Why a datagram could not be classified.
#[derive(Debug, ThisError)]
pub enum AnnouncementError {
    #[error("datagram is not valid UTF-8")]
    NotUtf8(#[from] core::str::Utf8Error),
    #[error("datagram matches no known announcement shape")]
    Unrecognized(#[source] serde_json::Error),
}

impl Announcement {
    /// Classify a raw datagram payload.
    ///
    /// # Errors
    ///
    /// Returns an error for non-UTF-8 payloads and for payloads that are not
    /// JSON of either recognized shape. Such datagrams are never fatal to the
    /// receiver; callers drop them.
    pub fn classify(payload: &[u8]) -> Result<Self, AnnouncementError> {
        let text = core::str::from_utf8(payload)?;
        serde_json::from_str(text).map_err(AnnouncementError::Unrecognized)
    }

    /// The device identifier carried by either shape.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Heartbeat { heartbeat, .. } => heartbeat,
            Self::Discovery { device_id, .. } => device_id,
        }
    }
}

/// Body of a successful `GET /data` health query response.
///
/// Field names are the controller firmware's wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    pub temperature: f32,
    pub humidity: f32,
    pub light_state: bool,
    pub fan_state: bool,
    pub humidifier_state: bool,
}

/// Body of the `POST /pair` request that claims a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairRequest {
    /// Stable, locally generated identifier of the claiming installation.
    pub phone_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_heartbeat() {
        let msg = Announcement::classify(br#"{"heartbeat":"dev1","ip":"10.0.0.5"}"#).unwrap();
        assert_eq!(
            msg,
            Announcement::Heartbeat {
                heartbeat: "dev1".to_string(),
                ip: "10.0.0.5".to_string(),
            }
        );
        assert_eq!(msg.device_id(), "dev1");
    }

    #[test]
    fn classifies_discovery() {
        let msg =
            Announcement::classify(br#"{"device_id":"dev2","ip":"10.0.0.9","name":"Incubator"}"#)
                .unwrap();
        assert_eq!(
            msg,
            Announcement::Discovery {
                device_id: "dev2".to_string(),
                ip: "10.0.0.9".to_string(),
                name: "Incubator".to_string(),
            }
        );
    }

    #[test]
    fn heartbeat_shape_wins_when_both_keys_present() {
        let msg = Announcement::classify(
            br#"{"heartbeat":"dev1","device_id":"dev1","ip":"10.0.0.5","name":"x"}"#,
        )
        .unwrap();
        assert!(matches!(msg, Announcement::Heartbeat { .. }));
    }

    #[test]
    fn rejects_unknown_shape() {
        let err = Announcement::classify(br#"{"hello":"world"}"#).unwrap_err();
        assert!(matches!(err, AnnouncementError::Unrecognized(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = Announcement::classify(b"not json at all").unwrap_err();
        assert!(matches!(err, AnnouncementError::Unrecognized(_)));
    }

    #[test]
    fn rejects_non_utf8() {
        let err = Announcement::classify(&[0xff, 0xfe, 0x80]).unwrap_err();
        assert!(matches!(err, AnnouncementError::NotUtf8(_)));
    }

    #[test]
    fn telemetry_report_uses_firmware_field_names() {
        let body = r#"{
            "temperature": 37.6,
            "humidity": 55.0,
            "lightState": true,
            "fanState": false,
            "humidifierState": true
        }"#;
        let report: TelemetryReport = serde_json::from_str(body).unwrap();
        assert!((report.temperature - 37.6).abs() < f32::EPSILON);
        assert!(report.light_state);
        assert!(!report.fan_state);
        assert!(report.humidifier_state);
    }
}
