//! Background task that keeps the broker connection and topology alive.

use std::sync::Arc;
use std::time::Duration;

use storyfeed_events::{bootstrap_topology, BrokerClient, ConnectionState};
use tokio_util::sync::CancellationToken;

/// Periodically checks the broker client and restores it after a drop.
pub struct BrokerWatchdog {
    client: Arc<BrokerClient>,
    interval: Duration,
}

impl BrokerWatchdog {
    pub fn new(client: Arc<BrokerClient>, interval: Duration) -> Self {
        Self { client, interval }
    }

    /// Run until `cancel` fires or the client is torn down.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Broker watchdog cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check(&cancel).await {
                        break;
                    }
                }
            }
        }
    }

    /// One health check. Returns `false` once the client is closed.
    pub async fn check(&self, cancel: &CancellationToken) -> bool {
        match self.client.health_check().await {
            ConnectionState::Connected => return true,
            ConnectionState::Closed => return false,
            state => tracing::warn!(%state, "Broker not connected, reconnecting"),
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return false,
            result = self.client.reconnect() => result,
        };

        match result {
            Ok(()) => {
                let report = bootstrap_topology(&self.client).await;
                if report.is_complete() {
                    tracing::info!("Broker topology restored");
                } else {
                    tracing::warn!(
                        failed = report.failed.len(),
                        "Broker topology restored partially",
                    );
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Broker reconnect failed");
                !matches!(e, storyfeed_events::BrokerError::Closed)
            }
        }
    }
}
