//! Gateway error types

use std::io;

/// Failure to open a connection or complete its handshake.
///
/// The partially opened socket is always dropped before one of these is
/// returned, so no session exists for a failed connect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("failed to reach game server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to game server at {0}")]
    Timeout(String),
    #[error("malformed handshake frame: {0}")]
    Handshake(String),
    #[error("handshake frame has no usable player identifier")]
    MissingIdentifier,
    #[error("game server closed the connection before the handshake")]
    ClosedBeforeHandshake,
    #[error("socket error during handshake: {0}")]
    Io(#[from] io::Error),
}

/// Session lookup errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),
}

/// Errors on an established connection handle
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection closed")]
    Closed,
}

/// Gateway-level errors surfaced to request handlers
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("Failed to encode action: {0}")]
    Encode(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the error means the client has no live session.
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::Session(SessionError::NotFound(_)))
    }
}
