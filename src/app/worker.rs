//! Background liveness sweeper for connection ping/pong.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::SOCKET_PING_TIMEOUT;

use super::service::PairingService;

/// Configuration for the liveness sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between liveness passes
    pub interval: Duration,
    /// Whether the sweeper is enabled
    pub enabled: bool,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: SOCKET_PING_TIMEOUT,
            enabled: true,
        }
    }
}

/// Periodically pings every attached connection and reaps the ones whose
/// previous ping went unanswered.
pub struct LivenessSweeper {
    service: Arc<PairingService>,
    config: SweeperConfig,
    shutdown_rx: watch::Receiver<bool>,
}

impl LivenessSweeper {
    /// Create a new sweeper instance
    pub fn new(
        service: Arc<PairingService>,
        config: SweeperConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service,
            config,
            shutdown_rx,
        }
    }

    /// Run the sweep loop
    pub async fn run(mut self) {
        if !self.config.enabled {
            info!("Liveness sweeper is disabled");
            return;
        }

        info!(interval = ?self.config.interval, "Starting liveness sweeper");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    self.sweep().await;
                }
                result = self.shutdown_rx.changed() => {
                    if result.is_ok() && *self.shutdown_rx.borrow() {
                        info!("Liveness sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Execute a single pass (for testing)
    pub async fn run_once(&self) {
        if !self.config.enabled {
            return;
        }
        self.sweep().await;
    }

    async fn sweep(&self) {
        let reaped = self.service.sweep_liveness().await;
        if reaped > 0 {
            warn!(reaped = reaped, "Reaped unresponsive connections");
        } else {
            debug!("Liveness sweep clean");
        }
    }
}

/// Spawn the sweeper as a tokio task
pub fn spawn_sweeper(
    service: Arc<PairingService>,
    config: SweeperConfig,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = LivenessSweeper::new(service, config, shutdown_rx);
    let handle = tokio::spawn(sweeper.run());
    (handle, shutdown_tx)
}
