//! Croupier Gateway - session and connection lifecycle for game clients
//!
//! Bridges short, stateless HTTP polls to one long-lived TCP connection per
//! player on the game server. Each session caches the latest state the game
//! server pushed, answers polls from that cache, forwards actions onto the
//! socket, and is reaped once its client goes quiet.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod protocol;
pub mod reaper;
pub mod session;

pub use codec::JsonFrameCodec;
pub use config::GatewayConfig;
pub use connection::{ConnectionHandle, ConnectionId, Establisher, LinkEvent, LinkState};
pub use error::{ConnectError, ConnectionError, GatewayError, SessionError};
pub use gateway::Gateway;
pub use protocol::{ClientId, Handshake, InboundFrame};
pub use reaper::Reaper;
pub use session::{Session, SessionSnapshot, SessionTable};
