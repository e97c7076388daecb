//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for collaborative note editing. Every frame is a JSON text message tagged by `type`.

use quickpad_core::ports::{PortError, PortResult};
use quickpad_core::sync::Change;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// The outbound queue of one connection. Drained by that connection's writer task.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a note's live session. `secret` is needed only for protected notes.
    Join {
        note_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },

    /// Submits a change built on `base_version`. Exactly one of `content` (the
    /// whole new text) or `delta` (a splice) must be present.
    Edit {
        note_id: String,
        base_version: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delta: Option<Delta>,
    },

    /// Leaves the current session without closing the socket.
    Leave,
}

/// A splice into the authoritative content, counted in characters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub offset: usize,
    #[serde(default)]
    pub remove: usize,
    #[serde(default)]
    pub insert: String,
}

/// Turns the optional wire fields of an edit into a domain `Change`.
pub fn change_from_wire(content: Option<String>, delta: Option<Delta>) -> PortResult<Change> {
    match (content, delta) {
        (Some(content), None) => Ok(Change::Replace(content)),
        (None, Some(delta)) => Ok(Change::Splice {
            offset: delta.offset,
            remove: delta.remove,
            insert: delta.insert,
        }),
        _ => Err(PortError::InvalidState(
            "an edit must carry exactly one of content or delta".to_string(),
        )),
    }
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms a join and carries the state the client should start from.
    Joined {
        note_id: String,
        content: String,
        version: u64,
    },

    /// The authoritative state after an accepted edit. `rebase` tells the
    /// client to replace its local text instead of assuming a clean merge.
    Update {
        note_id: String,
        version: u64,
        content: String,
        rebase: bool,
    },

    /// The secret was wrong or missing. Deliberately says nothing else.
    AuthFailed,

    NotFound,

    /// A protocol violation or a transient failure. After a violation the
    /// client has to join again before it can edit.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn join_without_secret_parses() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"join","note_id":"abc"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join {
                note_id: "abc".to_string(),
                secret: None
            }
        );
    }

    #[test]
    fn edit_with_delta_parses() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"edit","note_id":"abc","base_version":3,"delta":{"offset":2,"insert":"x"}}"#,
        )
        .unwrap();
        assert_matches!(
            msg,
            ClientMessage::Edit { base_version: 3, content: None, delta: Some(Delta { offset: 2, remove: 0, .. }), .. }
        );
    }

    #[test]
    fn server_messages_are_tagged_in_snake_case() {
        let json = serde_json::to_value(ServerMessage::AuthFailed).unwrap();
        assert_eq!(json, serde_json::json!({"type": "auth_failed"}));

        let json = serde_json::to_value(ServerMessage::Update {
            note_id: "abc".to_string(),
            version: 2,
            content: "hi".to_string(),
            rebase: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "update", "note_id": "abc", "version": 2, "content": "hi", "rebase": true})
        );
    }

    #[test]
    fn edit_must_carry_exactly_one_payload() {
        assert_matches!(change_from_wire(None, None), Err(PortError::InvalidState(_)));
        let delta = Delta {
            offset: 0,
            remove: 0,
            insert: String::new(),
        };
        assert_matches!(
            change_from_wire(Some("x".to_string()), Some(delta)),
            Err(PortError::InvalidState(_))
        );
        assert_eq!(
            change_from_wire(Some("x".to_string()), None),
            Ok(Change::Replace("x".to_string()))
        );
    }
}
