//! One-shot pairing of a discovered controller.
//!
//! Pairing is optimistic by design: the local claim is recorded (and
//! persisted) before the network round-trip, and a failed `POST /pair` does
//! not roll it back. The controller may already be mid-announcement, and
//! losing the claim to a transient blip would be worse than waiting for the
//! next heartbeat or poll cycle to reconcile the true state.

use alloc::sync::Arc;

use eyre::WrapErr as _;
use tracing::{info, warn};

use broodlink_common::PairRequest;

use crate::{
    config::TimingConfig,
    device::{DEFAULT_PAIRED_NAME, Device},
    registry::Registry,
};

/// Whether the controller acknowledged the claim. The local claim holds
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOutcome {
    /// The controller returned 2xx; it is marked online immediately.
    Confirmed,
    /// The request failed or returned an error status. The device stays
    /// paired but offline until a heartbeat or poll proves it reachable.
    Unconfirmed,
}

/// Client for claiming discovered controllers.
#[derive(Debug, Clone)]
pub struct PairingClient {
    client: reqwest::Client,
    device_port: u16,
    client_id: String,
}

impl PairingClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(timing: &TimingConfig, device_port: u16, client_id: String) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timing.request_timeout())
            .timeout(timing.request_timeout())
            .build()
            .wrap_err("Failed to build pairing HTTP client")?;
        Ok(Self {
            client,
            device_port,
            client_id,
        })
    }

    /// Claim a discovered controller: record it as paired with the default
    /// name, then notify the controller of the claim.
    pub async fn pair(&self, registry: &Arc<Registry>, discovered: Device) -> PairOutcome {
        let device = Device {
            name: DEFAULT_PAIRED_NAME.to_string(),
            ..discovered
        };
        let paired = registry.pair(device).await;
        info!("Paired device '{}' at {}", paired.id, paired.ip);

        let url = format!("http://{}:{}/pair", paired.ip, self.device_port);
        let body = PairRequest {
            phone_id: self.client_id.clone(),
        };
        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                registry.mark_online(&paired.id).await;
                PairOutcome::Confirmed
            }
            Ok(response) => {
                warn!(
                    "Controller at {url} rejected pairing with status {}; keeping local claim",
                    response.status()
                );
                PairOutcome::Unconfirmed
            }
            Err(e) => {
                warn!("Pairing request to {url} failed: {e}; keeping local claim");
                PairOutcome::Unconfirmed
            }
        }
    }
}
