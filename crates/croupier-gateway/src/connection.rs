//! Game server connections
//!
//! Every connection walks the same small state machine:
//! `AwaitingHandshake -> Attached -> Closed`. The [`Establisher`] drives the
//! first transition by consuming exactly one frame, the socket monitor
//! drives the rest. The write side lives in a [`ConnectionHandle`] owned by
//! the session; the read side is handed to the monitor as a [`LinkReader`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::JsonFrameCodec;
use crate::config::GatewayConfig;
use crate::error::{ConnectError, ConnectionError};
use crate::protocol::{Handshake, InboundFrame};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one established connection.
///
/// A client id can be reissued by the game server; the connection id tells
/// the old socket apart from the one that replaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Lifecycle of a game server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    AwaitingHandshake,
    Attached,
    Closed,
}

/// Something observed on the read side of a connection
#[derive(Debug)]
pub enum LinkEvent {
    Frame(InboundFrame),
    Closed,
    Errored(io::Error),
}

impl LinkEvent {
    /// Translate the next item of a frame stream into an event.
    pub fn from_read(read: Option<Result<InboundFrame, io::Error>>) -> Self {
        match read {
            Some(Ok(frame)) => LinkEvent::Frame(frame),
            Some(Err(e)) => LinkEvent::Errored(e),
            None => LinkEvent::Closed,
        }
    }
}

impl LinkState {
    /// Closed is terminal; the first frame moves a fresh link to Attached.
    pub fn on_event(self, event: &LinkEvent) -> LinkState {
        match (self, event) {
            (LinkState::Closed, _) => LinkState::Closed,
            (_, LinkEvent::Closed | LinkEvent::Errored(_)) => LinkState::Closed,
            (LinkState::AwaitingHandshake | LinkState::Attached, LinkEvent::Frame(_)) => {
                LinkState::Attached
            }
        }
    }

    pub fn is_closed(self) -> bool {
        self == LinkState::Closed
    }
}

/// Write side of a connection plus its close signal.
///
/// Not `Clone`: the session that owns it is the only party allowed to
/// write to or close the socket.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    sender: mpsc::UnboundedSender<Bytes>,
    shutdown: CancellationToken,
}

impl ConnectionHandle {
    /// Spawn the writer task for `writer` and return its handle.
    pub fn spawn<W>(
        id: ConnectionId,
        peer: Option<SocketAddr>,
        writer: W,
        shutdown: CancellationToken,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(id, writer, receiver, shutdown.clone()));
        Self {
            id,
            peer,
            sender,
            shutdown,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue bytes for the game server. Does not wait for the write.
    pub fn send(&self, payload: Bytes) -> Result<(), ConnectionError> {
        if self.shutdown.is_cancelled() {
            return Err(ConnectionError::Closed);
        }
        self.sender
            .send(payload)
            .map_err(|_| ConnectionError::Closed)
    }

    /// Close the connection. Closing twice is a no-op.
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            debug!(connection = %self.id, "Closing game server connection");
            self.shutdown.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn write_loop<W>(
    id: ConnectionId,
    mut writer: W,
    mut receiver: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            payload = receiver.recv() => match payload {
                Some(bytes) => {
                    if let Err(e) = write_payload(&mut writer, &bytes).await {
                        warn!(connection = %id, "Write to game server failed: {}", e);
                        // A dead write side ends the session like a dead read side.
                        shutdown.cancel();
                        return;
                    }
                }
                None => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }

    // Flush actions queued before the close, then send FIN.
    receiver.close();
    while let Ok(bytes) = receiver.try_recv() {
        if write_payload(&mut writer, &bytes).await.is_err() {
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(connection = %id, "Shutdown of game server socket failed: {}", e);
    }
}

async fn write_payload<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// Read side of an attached connection, consumed by the socket monitor
#[derive(Debug)]
pub struct LinkReader<R> {
    pub connection_id: ConnectionId,
    pub frames: FramedRead<R, JsonFrameCodec>,
    pub state: LinkState,
    pub shutdown: CancellationToken,
}

/// A connection whose handshake has resolved and whose monitor is not yet
/// attached.
#[derive(Debug)]
pub struct EstablishedLink<R, W> {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    frames: FramedRead<R, JsonFrameCodec>,
    writer: W,
    state: LinkState,
}

impl<R, W> EstablishedLink<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Split into the handle stored in the session and the reader the
    /// monitor consumes. Both share one close signal.
    pub fn into_parts(self) -> (ConnectionHandle, LinkReader<R>) {
        let shutdown = CancellationToken::new();
        let handle = ConnectionHandle::spawn(self.id, self.peer, self.writer, shutdown.clone());
        let reader = LinkReader {
            connection_id: self.id,
            frames: self.frames,
            state: self.state,
            shutdown,
        };
        (handle, reader)
    }
}

/// Read exactly one frame from a fresh connection and interpret it as the
/// handshake. Frames after the first stay buffered in the returned link.
pub async fn handshake<R, W>(
    reader: R,
    writer: W,
    peer: Option<SocketAddr>,
    codec: JsonFrameCodec,
) -> Result<(EstablishedLink<R, W>, Handshake), ConnectError>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, codec);
    let event = LinkEvent::from_read(frames.next().await);
    let state = LinkState::AwaitingHandshake.on_event(&event);

    let handshake = match event {
        LinkEvent::Frame(InboundFrame::State(frame)) => Handshake::from_frame(frame)?,
        LinkEvent::Frame(InboundFrame::Malformed { reason, .. }) => {
            return Err(ConnectError::Handshake(reason))
        }
        LinkEvent::Closed => return Err(ConnectError::ClosedBeforeHandshake),
        LinkEvent::Errored(e) => return Err(ConnectError::Io(e)),
    };

    let link = EstablishedLink {
        id: ConnectionId::next(),
        peer,
        frames,
        writer,
        state,
    };
    Ok((link, handshake))
}

/// Opens connections to the game server
#[derive(Debug, Clone)]
pub struct Establisher {
    host: String,
    port: u16,
    connect_timeout: Duration,
    max_frame_bytes: usize,
}

impl Establisher {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            host: config.remote_host.clone(),
            port: config.remote_port,
            connect_timeout: config.connect_timeout,
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open a TCP connection and wait for the handshake frame.
    ///
    /// On any failure the socket is dropped before returning.
    pub async fn connect(
        &self,
    ) -> Result<(EstablishedLink<OwnedReadHalf, OwnedWriteHalf>, Handshake), ConnectError> {
        let addr = self.addr();
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ConnectError::Timeout(addr.clone()))?
        .map_err(|source| ConnectError::Connect {
            addr: addr.clone(),
            source,
        })?;

        let peer = stream.peer_addr().ok();
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        debug!("Connected to game server at {}", addr);

        let (read_half, write_half) = stream.into_split();
        handshake(
            read_half,
            write_half,
            peer,
            JsonFrameCodec::new(self.max_frame_bytes),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, split, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_state_machine_transitions() {
        let frame = || LinkEvent::Frame(InboundFrame::State(json!({})));

        assert_eq!(LinkState::AwaitingHandshake.on_event(&frame()), LinkState::Attached);
        assert_eq!(LinkState::Attached.on_event(&frame()), LinkState::Attached);
        assert_eq!(LinkState::Attached.on_event(&LinkEvent::Closed), LinkState::Closed);
        assert_eq!(
            LinkState::AwaitingHandshake
                .on_event(&LinkEvent::Errored(io::Error::from(io::ErrorKind::ConnectionReset))),
            LinkState::Closed
        );
        assert_eq!(LinkState::Closed.on_event(&frame()), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_handshake_consumes_only_first_frame() {
        let (local, mut remote) = duplex(1024);
        let (reader, writer) = split(local);

        remote
            .write_all(b"{\"playerID\": 7, \"gameState\": {\"phase\":0}}{\"phase\":1}")
            .await
            .unwrap();

        let (link, hs) = handshake(reader, writer, None, JsonFrameCodec::default())
            .await
            .unwrap();
        assert_eq!(hs.client_id.key(), "7");
        assert_eq!(hs.state, json!({"phase": 0}));
        assert_eq!(link.state(), LinkState::Attached);

        let (_handle, mut reader) = link.into_parts();
        let next = reader.frames.next().await.unwrap().unwrap();
        assert_eq!(next, InboundFrame::State(json!({"phase": 1})));
    }

    #[tokio::test]
    async fn test_handshake_fails_on_malformed_frame() {
        let (local, mut remote) = duplex(1024);
        let (reader, writer) = split(local);
        remote.write_all(b"<html>").await.unwrap();

        let err = handshake(reader, writer, None, JsonFrameCodec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_handshake_fails_when_closed_early() {
        let (local, remote) = duplex(1024);
        let (reader, writer) = split(local);
        drop(remote);

        let err = handshake(reader, writer, None, JsonFrameCodec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::ClosedBeforeHandshake));
    }

    #[tokio::test]
    async fn test_handle_writes_then_closes() {
        let (local, mut remote) = duplex(1024);
        let handle = ConnectionHandle::spawn(
            ConnectionId::next(),
            None,
            local,
            CancellationToken::new(),
        );

        handle.send(Bytes::from_static(b"{\"type\":\"BET\"}")).unwrap();
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(Bytes::from_static(b"{}")),
            Err(ConnectionError::Closed)
        ));

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"{\"type\":\"BET\"}");
    }

    #[tokio::test]
    async fn test_establisher_reports_refused_connection() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = GatewayConfig::default().with_remote("127.0.0.1", port);
        let err = Establisher::new(&config).connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_establisher_closes_socket_on_bad_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"{\"gameState\": {}}").await.unwrap();
            let mut rest = Vec::new();
            // Returns once the gateway side has dropped the socket.
            socket.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let config = GatewayConfig::default().with_remote("127.0.0.1", port);
        let err = Establisher::new(&config).connect().await.unwrap_err();
        assert!(matches!(err, ConnectError::MissingIdentifier));
        assert!(server.await.unwrap().is_empty());
    }
}
