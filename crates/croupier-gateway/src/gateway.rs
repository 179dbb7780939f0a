//! Gateway main structure
//!
//! Owns the session table and wires the establisher, monitors and reaper
//! around it. Request handlers talk to this type only.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::GatewayConfig;
use crate::connection::{EstablishedLink, Establisher};
use crate::error::{GatewayError, SessionError};
use crate::monitor;
use crate::protocol::{encode_action, ClientId, Handshake};
use crate::reaper::Reaper;
use crate::session::SessionTable;

/// Bridge between polling clients and their game server sockets
#[derive(Debug, Clone)]
pub struct Gateway {
    config: GatewayConfig,
    sessions: SessionTable,
    establisher: Establisher,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let establisher = Establisher::new(&config);
        Self {
            config,
            sessions: SessionTable::new(),
            establisher,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Open a game server connection for a new client and register its
    /// session. Returns the identifier the game server assigned.
    pub async fn connect(&self) -> Result<ClientId, GatewayError> {
        info!("New client connection request received");
        let (link, handshake) = self.establisher.connect().await.map_err(|e| {
            error!(remote = %self.config.remote_addr(), "Unable to connect to game server: {}", e);
            e
        })?;
        Ok(self.register(link, handshake))
    }

    /// Insert the session for a handshaken link, then attach its monitor.
    ///
    /// The monitor is attached only after the insert so frames pushed right
    /// after the handshake land on the new entry.
    pub fn register<R, W>(&self, link: EstablishedLink<R, W>, handshake: Handshake) -> ClientId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Handshake { client_id, state } = handshake;
        let (handle, reader) = link.into_parts();
        info!(client_id = %client_id, connection = %handle.id(), "Client connected");

        self.sessions.insert(client_id.clone(), handle, state);
        monitor::attach(self.sessions.clone(), client_id.clone(), reader);
        client_id
    }

    /// Cached state for `id`, refreshing its activity.
    pub fn poll(&self, id: &str) -> Result<Value, SessionError> {
        debug!(client_id = %id, "Received update poll");
        self.sessions.poll(id)
    }

    /// Forward a client action to the game server without waiting for it
    /// to be applied.
    pub fn action(&self, id: &str, action: &Value) -> Result<(), GatewayError> {
        debug!(client_id = %id, "Client submitted an action");
        let payload = encode_action(action)?;
        self.sessions.send(id, payload)?;
        Ok(())
    }

    /// Start the inactivity reaper. It stops on [`shutdown`](Self::shutdown).
    pub fn start_reaper(&self) -> JoinHandle<()> {
        Reaper::new(
            self.sessions.clone(),
            self.config.inactivity_limit,
            self.config.sweep_interval,
        )
        .spawn(self.shutdown.child_token())
    }

    /// Stop the reaper and close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let closed = self.sessions.close_all();
        info!("Gateway shut down, closed {} session(s)", closed);
    }
}

impl std::fmt::Display for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gateway({})", self.config.remote_addr())
    }
}
