//! Gateway configuration

use std::time::Duration;

use crate::codec::DEFAULT_MAX_FRAME_BYTES;

/// Seconds of client silence before a session is reaped.
pub const CLIENT_INACTIVITY_LIMIT_SECS: u64 = 20;
/// Seconds between reaper sweeps.
pub const SWEEP_INTERVAL_SECS: u64 = 5;
/// Default game server port.
pub const DEFAULT_GAME_SERVER_PORT: u16 = 2000;

/// Gateway configuration
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    /// Game server host
    pub remote_host: String,
    /// Game server TCP port
    pub remote_port: u16,
    /// Upper bound on the TCP connect; the handshake wait is not bounded
    pub connect_timeout: Duration,
    /// Client silence after which a session is evicted
    pub inactivity_limit: Duration,
    /// Period of the inactivity sweep
    pub sweep_interval: Duration,
    /// Largest inbound frame buffered before it is discarded
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            remote_host: "localhost".to_string(),
            remote_port: DEFAULT_GAME_SERVER_PORT,
            connect_timeout: Duration::from_secs(10),
            inactivity_limit: Duration::from_secs(CLIENT_INACTIVITY_LIMIT_SECS),
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn with_remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote_host = host.into();
        self.remote_port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_inactivity_limit(mut self, limit: Duration) -> Self {
        self.inactivity_limit = limit;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// `host:port` of the game server, for logs and errors.
    pub fn remote_addr(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}
