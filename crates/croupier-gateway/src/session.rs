//! Session management
//!
//! The session table is the single source of truth for which clients have a
//! live game server connection. Every operation runs under the map's shard
//! lock for that key, so readers never observe a half-written record and
//! concurrent writers on one id serialize.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::SessionError;
use crate::protocol::ClientId;

/// A client bound to its game server connection
#[derive(Debug)]
pub struct Session {
    /// Identifier issued by the game server
    pub client_id: ClientId,
    /// Exclusively owned connection
    connection: ConnectionHandle,
    /// Last state pushed by the game server
    pub cached_state: Value,
    /// Last client poll/action or server push
    pub last_active_at: Instant,
    /// Wall-clock time the session was created
    pub connected_at: DateTime<Utc>,
}

impl Session {
    fn new(client_id: ClientId, connection: ConnectionHandle, initial_state: Value) -> Self {
        Self {
            client_id,
            connection,
            cached_state: initial_state,
            last_active_at: Instant::now(),
            connected_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn touch(&mut self) {
        self.last_active_at = Instant::now();
    }

    /// Time since last activity, measured at `now`
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active_at)
    }

    fn is_live(&self) -> bool {
        !self.connection.is_closed()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            client_id: self.client_id.clone(),
            connection_id: self.connection.id(),
            cached_state: self.cached_state.clone(),
            last_active_at: self.last_active_at,
            connected_at: self.connected_at,
        }
    }

    fn close(self) {
        self.connection.close();
    }
}

/// Copy of a session record taken under the table lock
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub cached_state: Value,
    pub last_active_at: Instant,
    pub connected_at: DateTime<Utc>,
}

/// Registry of all live sessions, keyed by client id
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: Arc<DashMap<String, Session>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a freshly handshaken connection.
    ///
    /// A previous session under the same id is replaced and its connection
    /// closed; the id of that connection is returned.
    pub fn insert(
        &self,
        client_id: ClientId,
        connection: ConnectionHandle,
        initial_state: Value,
    ) -> Option<ConnectionId> {
        let key = client_id.key();
        let session = Session::new(client_id, connection, initial_state);
        let replaced = self.sessions.insert(key, session)?;
        let replaced_id = replaced.connection_id();
        info!(
            client_id = %replaced.client_id,
            connection = %replaced_id,
            "Replacing session with newer connection"
        );
        replaced.close();
        Some(replaced_id)
    }

    /// Snapshot of a live session.
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.sessions
            .get(id)
            .filter(|entry| entry.is_live())
            .map(|entry| entry.snapshot())
    }

    /// Refresh activity. Absent ids are ignored.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Touch and return the cached state in one step.
    pub fn poll(&self, id: &str) -> Result<Value, SessionError> {
        match self.sessions.get_mut(id) {
            Some(mut session) if session.is_live() => {
                session.touch();
                Ok(session.cached_state.clone())
            }
            _ => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Touch and queue an outbound payload on the session's connection.
    pub fn send(&self, id: &str, payload: Bytes) -> Result<(), SessionError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        session.touch();
        session
            .connection
            .send(payload)
            .map_err(|_| SessionError::NotFound(id.to_string()))
    }

    /// Replace the cached state and refresh activity. A frame for a session
    /// that no longer exists is discarded.
    pub fn update_state(&self, id: &str, state: Value) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => {
                session.cached_state = state;
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Like [`update_state`](Self::update_state), but only while `connection`
    /// still owns the entry.
    pub fn update_state_from(&self, id: &str, connection: ConnectionId, state: Value) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) if session.connection_id() == connection => {
                session.cached_state = state;
                session.touch();
                true
            }
            _ => false,
        }
    }

    /// Close the session's connection and delete it. Removing an absent id
    /// is a no-op.
    pub fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                debug!(client_id = %session.client_id, "Session removed");
                session.close();
                true
            }
            None => false,
        }
    }

    /// Like [`remove`](Self::remove), but only while `connection` still owns
    /// the entry, so a superseded socket cannot tear down its replacement.
    pub fn remove_connection(&self, id: &str, connection: ConnectionId) -> bool {
        match self
            .sessions
            .remove_if(id, |_, session| session.connection_id() == connection)
        {
            Some((_, session)) => {
                debug!(client_id = %session.client_id, connection = %connection, "Session removed");
                session.close();
                true
            }
            None => false,
        }
    }

    /// Evict every session idle for longer than `threshold` as of `now`.
    pub fn sweep_expired(&self, threshold: Duration, now: Instant) -> Vec<ClientId> {
        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_time(now) > threshold)
            .map(|entry| entry.key().clone())
            .collect();

        // Re-check under the write lock: a poll may have landed since.
        candidates
            .into_iter()
            .filter_map(|key| {
                self.sessions
                    .remove_if(&key, |_, session| session.idle_time(now) > threshold)
            })
            .map(|(_, session)| {
                let client_id = session.client_id.clone();
                session.close();
                client_id
            })
            .collect()
    }

    /// Close and drop every session.
    pub fn close_all(&self) -> usize {
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.iter().filter(|key| self.remove(key)).count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn list_sessions(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}
