//! Socket monitor
//!
//! One task per attached connection. It applies every pushed frame to the
//! session table and removes the session once the socket closes or errors.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{LinkEvent, LinkReader};
use crate::protocol::{ClientId, InboundFrame};
use crate::session::SessionTable;

/// Spawn the monitor for a connection whose session is already in `table`.
pub fn attach<R>(table: SessionTable, client_id: ClientId, reader: LinkReader<R>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run(table, client_id, reader))
}

async fn run<R>(table: SessionTable, client_id: ClientId, reader: LinkReader<R>)
where
    R: AsyncRead + Unpin,
{
    let LinkReader {
        connection_id,
        mut frames,
        mut state,
        shutdown,
    } = reader;
    let key = client_id.key();

    debug!(client_id = %client_id, connection = %connection_id, "Monitoring game server socket");

    while !state.is_closed() {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                // Closed locally: evicted, replaced, or the write side failed.
                debug!(client_id = %client_id, connection = %connection_id, "Monitor stopping after local close");
                table.remove_connection(&key, connection_id);
                return;
            }
            read = frames.next() => LinkEvent::from_read(read),
        };
        state = state.on_event(&event);

        match event {
            LinkEvent::Frame(InboundFrame::State(frame)) => {
                if !table.update_state_from(&key, connection_id, frame) {
                    debug!(client_id = %client_id, "Discarding frame for a session that is gone");
                }
            }
            LinkEvent::Frame(InboundFrame::Malformed { reason, discarded }) => {
                warn!(
                    client_id = %client_id,
                    discarded,
                    "Dropping malformed frame from game server: {}",
                    reason
                );
            }
            LinkEvent::Closed => {
                info!(client_id = %client_id, "Game server connection closed");
                table.remove_connection(&key, connection_id);
            }
            LinkEvent::Errored(e) => {
                error!(client_id = %client_id, "Error on socket for client {}: {}", client_id, e);
                table.remove_connection(&key, connection_id);
            }
        }
    }
}
