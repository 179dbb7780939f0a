//! Wire types exchanged with the game server
//!
//! Inbound traffic is a stream of JSON frames: the first one on every
//! connection is the handshake, every later one is a full state snapshot.
//! Outbound traffic is one compact JSON object per client action.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConnectError;

/// Handshake field carrying the identifier assigned by the game server.
pub const ID_FIELD: &str = "playerID";
/// Handshake field carrying the initial game state.
pub const STATE_FIELD: &str = "gameState";

/// Identifier the game server assigns to a player during the handshake
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientId {
    Number(u64),
    Text(String),
}

impl ClientId {
    /// Table key for this identifier. Matches the `{id}` path segment
    /// clients send back on poll and action requests.
    pub fn key(&self) -> String {
        self.to_string()
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_u64().map(ClientId::Number),
            Value::String(s) if !s.trim().is_empty() => Some(ClientId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientId::Number(n) => write!(f, "{}", n),
            ClientId::Text(s) => f.write_str(s),
        }
    }
}

impl From<u64> for ClientId {
    fn from(id: u64) -> Self {
        ClientId::Number(id)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        ClientId::Text(id.to_string())
    }
}

/// The first frame read on a freshly opened connection
#[derive(Debug, Clone, PartialEq)]
pub struct Handshake {
    pub client_id: ClientId,
    pub state: Value,
}

impl Handshake {
    /// Interpret a decoded frame as a handshake.
    ///
    /// The identifier is mandatory. Game servers that only announce the
    /// player id get an empty object as their initial state.
    pub fn from_frame(frame: Value) -> Result<Self, ConnectError> {
        let Value::Object(mut fields) = frame else {
            return Err(ConnectError::Handshake(
                "handshake frame is not a JSON object".to_string(),
            ));
        };

        let client_id = fields
            .get(ID_FIELD)
            .and_then(ClientId::from_value)
            .ok_or(ConnectError::MissingIdentifier)?;

        let state = fields
            .remove(STATE_FIELD)
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(Self { client_id, state })
    }
}

/// One decoded unit of the inbound byte stream
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A complete JSON value
    State(Value),
    /// Bytes that could not be decoded and were dropped
    Malformed { reason: String, discarded: usize },
}

/// Encode a client action the way the game server expects it: a single
/// JSON object with no trailing delimiter.
pub fn encode_action(action: &Value) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(action).map(Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_handshake_with_state() {
        let hs = Handshake::from_frame(json!({"playerID": 7, "gameState": {"phase": 0}})).unwrap();
        assert_eq!(hs.client_id, ClientId::Number(7));
        assert_eq!(hs.state, json!({"phase": 0}));
    }

    #[test]
    fn test_handshake_without_state_seeds_empty_object() {
        let hs = Handshake::from_frame(json!({"playerID": 3})).unwrap();
        assert_eq!(hs.client_id, ClientId::Number(3));
        assert_eq!(hs.state, json!({}));
    }

    #[test]
    fn test_handshake_rejects_unusable_identifiers() {
        for frame in [
            json!({"gameState": {}}),
            json!({"playerID": null}),
            json!({"playerID": -1}),
            json!({"playerID": 1.5}),
            json!({"playerID": "  "}),
            json!({"playerID": {"nested": 1}}),
        ] {
            let err = Handshake::from_frame(frame.clone()).unwrap_err();
            assert!(
                matches!(err, ConnectError::MissingIdentifier),
                "unexpected result for {}",
                frame
            );
        }
    }

    #[test]
    fn test_handshake_rejects_non_object() {
        let err = Handshake::from_frame(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ConnectError::Handshake(_)));
    }

    #[test]
    fn test_client_id_key_matches_path_segment() {
        assert_eq!(ClientId::Number(7).key(), "7");
        assert_eq!(ClientId::from("table-2").key(), "table-2");
        assert_eq!(serde_json::to_value(ClientId::Number(7)).unwrap(), json!(7));
    }

    #[test]
    fn test_encode_action_is_compact_json() {
        let bytes = encode_action(&json!({"type": "TURN", "action": "HIT"})).unwrap();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(!text.contains('\n'));
        assert_eq!(
            serde_json::from_slice::<Value>(&bytes).unwrap(),
            json!({"type": "TURN", "action": "HIT"})
        );
    }
}
