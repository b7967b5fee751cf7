//! The broodlink discovery and liveness engine.
//!
//! Listens for controller broadcast announcements, actively polls paired
//! controllers that go quiet, and reconciles both signal sources into one
//! authoritative device view. Exposes `inner_main` so the workspace-level
//! shim binary can call into the engine.

extern crate alloc;
extern crate core;

pub mod cli;
pub mod config;
pub mod device;
pub mod listener;
pub mod netwatch;
pub mod pairing;
pub mod persist;
pub mod poller;
pub mod registry;
pub mod runtime;

use std::path::Path;

use eyre::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub use cli::{Cli, Command};
pub use runtime::Engine;

/// The engine's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if startup fails (unreadable config, unusable state
/// directory, or a failed socket bind).
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Monitor(args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            let config_path = Path::new(&args.config);
            let config = if config_path.exists() {
                info!("Using config path: {}", config_path.display());
                config::load(config_path).await?
            } else {
                info!(
                    "No config file at {}, using built-in defaults",
                    config_path.display()
                );
                config::EngineConfig::default()
            };

            let engine = Engine::start(config).await?;
            run_monitor(engine).await;
            Ok(())
        }
    }
}

/// Log every device-view change until a shutdown signal arrives, then shut
/// the engine down synchronously.
async fn run_monitor(engine: Engine) {
    let mut view_rx = engine.subscribe();
    loop {
        tokio::select! {
            () = shutdown_signal() => {
                info!("Received shutdown, shutting down");
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                let online = view.paired.iter().filter(|d| d.is_online).count();
                info!(
                    "{} paired ({online} online), {} discovered",
                    view.paired.len(),
                    view.discovered.len()
                );
            }
        }
    }
    engine.shutdown().await;
}

/// Creates a future that resolves when a shutdown signal is received.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                drop(tokio::signal::ctrl_c().await);
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        drop(tokio::signal::ctrl_c().await);
    }
}
