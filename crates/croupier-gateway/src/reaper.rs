//! Inactivity reaper
//!
//! Periodically evicts sessions whose client stopped polling, closing
//! sockets the game server still considers healthy.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::protocol::ClientId;
use crate::session::SessionTable;

/// Recurring sweep over a [`SessionTable`]
#[derive(Debug, Clone)]
pub struct Reaper {
    table: SessionTable,
    threshold: Duration,
    period: Duration,
}

impl Reaper {
    pub fn new(table: SessionTable, threshold: Duration, period: Duration) -> Self {
        Self {
            table,
            threshold,
            period,
        }
    }

    /// Run one sweep now.
    pub fn sweep(&self) -> Vec<ClientId> {
        let evicted = self.table.sweep_expired(self.threshold, Instant::now());
        for client_id in &evicted {
            info!(client_id = %client_id, "Disconnected client #{} after inactivity", client_id);
        }
        evicted
    }

    /// Sweep every `period` until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
            debug!("Reaper stopped");
        })
    }
}
