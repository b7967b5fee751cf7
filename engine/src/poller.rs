//! Health poller: actively confirms liveness of paired controllers whose
//! heartbeats have gone quiet, and evicts stale discovery entries.
//!
//! A failed query only flips that one device offline for that tick; the loop
//! itself never aborts and a still-quiet device is simply re-checked on the
//! next tick.

use alloc::sync::Arc;
use core::time::Duration;

use eyre::WrapErr as _;
use futures::future;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use broodlink_common::TelemetryReport;

use crate::{config::TimingConfig, device::now_millis, registry::Registry};

/// Periodic liveness checker for the paired set.
pub struct HealthPoller {
    client: reqwest::Client,
    registry: Arc<Registry>,
    device_port: u16,
    poll_interval: Duration,
    heartbeat_staleness: Duration,
    discovery_staleness: Duration,
}

impl HealthPoller {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        timing: &TimingConfig,
        device_port: u16,
        registry: Arc<Registry>,
    ) -> eyre::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timing.request_timeout())
            .timeout(timing.request_timeout())
            .build()
            .wrap_err("Failed to build health-query HTTP client")?;
        Ok(Self {
            client,
            registry,
            device_port,
            poll_interval: timing.poll_interval(),
            heartbeat_staleness: timing.heartbeat_staleness(),
            discovery_staleness: timing.discovery_staleness(),
        })
    }

    /// Tick until cancelled. Cancellation can only land between ticks; all
    /// queries within a tick resolve before the tick ends.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Health poller running every {:?} (staleness {:?})",
            self.poll_interval, self.heartbeat_staleness
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Health poller stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
    }

    /// One poll cycle: query every stale paired device (concurrently; no
    /// cross-device ordering is required), apply the joined results, then
    /// evict stale discovery entries.
    pub async fn tick(&self) {
        let now = now_millis();
        let stale = self
            .registry
            .stale_paired(now, self.heartbeat_staleness)
            .await;
        if !stale.is_empty() {
            debug!("{} paired device(s) gone quiet, querying", stale.len());
        }

        let queries = stale.into_iter().map(|device| {
            let client = self.client.clone();
            let port = self.device_port;
            async move {
                let result = query_device(&client, &device.ip, port).await;
                (device.id, result)
            }
        });
        let results = future::join_all(queries).await;

        for (id, result) in results {
            match result {
                Ok(report) => {
                    self.registry
                        .apply_poll_success(&id, report, now_millis())
                        .await;
                }
                Err(e) => {
                    debug!("Health query for '{id}' failed: {e:#}");
                    self.registry.mark_offline(&id).await;
                }
            }
        }

        let evicted = self
            .registry
            .evict_stale_discovered(now, self.discovery_staleness)
            .await;
        if evicted > 0 {
            debug!("Evicted {evicted} stale discovered device(s)");
        }
    }
}

/// Query one controller's `/data` endpoint. Non-2xx statuses and malformed
/// bodies count as failures, exactly like timeouts.
async fn query_device(
    client: &reqwest::Client,
    ip: &str,
    port: u16,
) -> eyre::Result<TelemetryReport> {
    let url = format!("http://{ip}:{port}/data");
    let response = client
        .get(&url)
        .send()
        .await
        .wrap_err(format!("Health query to {url} failed"))?
        .error_for_status()
        .wrap_err("Health query returned an error status")?;
    response
        .json::<TelemetryReport>()
        .await
        .wrap_err("Malformed health query response body")
}
