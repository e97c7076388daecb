//! crates/quickpad_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::Change;

/// Identifies one client connection to the realtime transport.
pub type ConnectionId = Uuid;

/// A durable note as held by the note repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub content: String,
    /// PHC-formatted hash. Present iff the note is protected.
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Note {
    pub fn is_protected(&self) -> bool {
        self.password_hash.is_some()
    }
}

/// The authoritative state handed to a client when it joins a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub note_id: String,
    pub content: String,
    pub version: u64,
}

/// One client's change to a note, as submitted against the version it last saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub note_id: String,
    pub base_version: u64,
    pub change: Change,
    pub sender: ConnectionId,
}

/// How an accepted edit related to the session's version at arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The sender had observed the current version.
    Clean,
    /// The sender was stale; everyone, the sender included, must adopt the result.
    Rebase,
}

/// Result of applying one edit to a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub accepted: bool,
    pub resolution: Resolution,
    pub resulting_version: u64,
    pub resulting_content: String,
}

impl EditOutcome {
    pub fn is_rebase(&self) -> bool {
        self.resolution == Resolution::Rebase
    }
}
