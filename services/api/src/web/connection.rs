//! services/api/src/web/connection.rs
//!
//! The per-connection state machine. The WebSocket handler feeds it decoded
//! client messages; it talks to the access gate and the session registry and
//! answers through the connection's outbox.
//!
//! ```text
//! Connecting -> AwaitingAuth -> Joined -> Left
//!                                  |
//!                                  +-> Desynced (after a protocol violation)
//! ```
//!
//! A connection is registered with at most one session at a time, and every
//! path out of `Joined`/`Desynced` calls `SessionRegistry::leave` exactly once.

use std::sync::Arc;

use quickpad_core::domain::{ConnectionId, Edit};
use quickpad_core::ports::PortError;
use tracing::{error, info, warn};

use crate::sync::{AccessDecision, AccessGate, SessionRegistry};
use crate::web::protocol::{change_from_wire, ClientMessage, Delta, Outbox, ServerMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    /// A join for a protected note was refused; the client may retry with a secret.
    AwaitingAuth { note_id: String },
    Joined { note_id: String },
    /// Still registered with the session, but edits are refused until the client joins again.
    Desynced { note_id: String },
    Left,
}

pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    registry: Arc<SessionRegistry>,
    gate: Arc<AccessGate>,
    outbox: Outbox,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        registry: Arc<SessionRegistry>,
        gate: Arc<AccessGate>,
        outbox: Outbox,
    ) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            registry,
            gate,
            outbox,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub async fn handle(&mut self, msg: ClientMessage) {
        if self.state == ConnectionState::Left {
            warn!(conn_id = %self.id, "Message received after the connection left, ignored");
            return;
        }
        match msg {
            ClientMessage::Join { note_id, secret } => self.on_join(note_id, secret).await,
            ClientMessage::Edit {
                note_id,
                base_version,
                content,
                delta,
            } => self.on_edit(note_id, base_version, content, delta).await,
            ClientMessage::Leave => {
                self.release_session().await;
                self.state = ConnectionState::Connecting;
            }
        }
    }

    /// Reports a frame that could not be decoded.
    pub fn reject_malformed(&self, reason: &str) {
        warn!(conn_id = %self.id, "Failed to deserialize client message: {}", reason);
        self.send(ServerMessage::Error {
            message: "Malformed message.".to_string(),
        });
    }

    /// Ends the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        self.release_session().await;
        self.state = ConnectionState::Left;
    }

    async fn on_join(&mut self, note_id: String, secret: Option<String>) {
        // A connection that was already let in keeps its grant for that note.
        if let ConnectionState::Joined { note_id: current } | ConnectionState::Desynced { note_id: current } =
            &self.state
        {
            if *current == note_id {
                match self.registry.get(&note_id).await {
                    Ok(snapshot) => {
                        self.state = ConnectionState::Joined { note_id };
                        self.send(ServerMessage::Joined {
                            note_id: snapshot.note_id,
                            content: snapshot.content,
                            version: snapshot.version,
                        });
                        return;
                    }
                    Err(e) => {
                        warn!(conn_id = %self.id, note_id = %note_id, "Re-join found no session: {}", e);
                    }
                }
            }
        }
        self.release_session().await;
        self.state = ConnectionState::Connecting;

        let access = self
            .gate
            .authorize(&note_id, secret.as_deref())
            .await
            .and_then(AccessDecision::require);
        match access {
            Ok(()) => {}
            Err(PortError::Unauthorized) => {
                info!(conn_id = %self.id, note_id = %note_id, "Access denied");
                self.state = ConnectionState::AwaitingAuth { note_id };
                self.report(PortError::Unauthorized);
                return;
            }
            Err(e) => {
                self.report(e);
                return;
            }
        }

        match self.registry.join(&note_id, self.id, self.outbox.clone()).await {
            Ok(snapshot) => {
                self.state = ConnectionState::Joined { note_id };
                self.send(ServerMessage::Joined {
                    note_id: snapshot.note_id,
                    content: snapshot.content,
                    version: snapshot.version,
                });
            }
            Err(e) => self.report(e),
        }
    }

    async fn on_edit(
        &mut self,
        note_id: String,
        base_version: u64,
        content: Option<String>,
        delta: Option<Delta>,
    ) {
        match &self.state {
            ConnectionState::Joined { note_id: current } if *current == note_id => {}
            ConnectionState::AwaitingAuth { note_id: pending } if *pending == note_id => {
                self.report(PortError::Unauthorized);
                return;
            }
            ConnectionState::Desynced { .. } => {
                self.send(ServerMessage::Error {
                    message: "Out of sync; join the note again before editing.".to_string(),
                });
                return;
            }
            _ => {
                self.send(ServerMessage::Error {
                    message: "Join the note before editing it.".to_string(),
                });
                return;
            }
        }

        let change = match change_from_wire(content, delta) {
            Ok(change) => change,
            Err(e) => {
                self.desync(note_id, e);
                return;
            }
        };
        let edit = Edit {
            note_id: note_id.clone(),
            base_version,
            change,
            sender: self.id,
        };
        match self.registry.apply_edit(edit).await {
            Ok(_) => {}
            Err(e @ PortError::InvalidState(_)) => self.desync(note_id, e),
            Err(e @ PortError::NotFound(_)) => {
                // The session is gone, so there is nothing left to leave.
                self.state = ConnectionState::Connecting;
                self.report(e);
            }
            Err(e) => self.report(e),
        }
    }

    fn desync(&mut self, note_id: String, error: PortError) {
        warn!(conn_id = %self.id, note_id = %note_id, "Protocol violation: {}", error);
        self.send(ServerMessage::Error {
            message: error.to_string(),
        });
        self.state = ConnectionState::Desynced { note_id };
    }

    async fn release_session(&mut self) {
        let note_id = match &self.state {
            ConnectionState::Joined { note_id } | ConnectionState::Desynced { note_id } => {
                note_id.clone()
            }
            _ => return,
        };
        self.state = ConnectionState::Connecting;
        if let Err(e) = self.registry.leave(&note_id, self.id).await {
            error!(conn_id = %self.id, note_id = %note_id, "Leave failed: {}", e);
        }
    }

    /// Answers the originating client only; nothing here is ever broadcast.
    fn report(&self, error: PortError) {
        let msg = match error {
            PortError::NotFound(_) => ServerMessage::NotFound,
            PortError::Unauthorized => ServerMessage::AuthFailed,
            PortError::InvalidState(message) => ServerMessage::Error { message },
            PortError::StorageUnavailable(reason) => {
                error!(conn_id = %self.id, "Storage unavailable: {}", reason);
                ServerMessage::Error {
                    message: "Storage is unavailable, please retry.".to_string(),
                }
            }
        };
        self.send(msg);
    }

    fn send(&self, msg: ServerMessage) {
        if self.outbox.send(msg).is_err() {
            warn!(conn_id = %self.id, "Outbox closed, message dropped");
        }
    }
}
