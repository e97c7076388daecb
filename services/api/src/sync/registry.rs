//! services/api/src/sync/registry.rs
//!
//! The process-wide session registry.
//!
//! Each active note owns one `LiveSession` behind its own `tokio::sync::Mutex`;
//! join, leave and edits for that note are serialized on it, while the map from
//! note id to session is only locked for lookups and inserts. Lock order is
//! always session before map, and the map lock is never held across I/O.
//!
//! A session entry moves through three states: freshly inserted (not yet
//! hydrated), live, and evicted. Whoever holds the session lock and finds it
//! unhydrated performs the hydration, so a join that was cancelled half-way
//! leaves nothing behind that the next joiner cannot repair. An evicted entry
//! has already been removed from the map; anyone still holding it retries the
//! lookup.

use std::collections::HashMap;
use std::sync::Arc;

use quickpad_core::domain::{ConnectionId, SessionSnapshot};
use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::FlushPolicy;
use crate::sync::flush::save_with_retry;
use crate::web::protocol::Outbox;

pub(crate) type Slot = Arc<Mutex<LiveSession>>;

/// The authoritative in-memory state of one note while anyone has it open.
pub(crate) struct LiveSession {
    pub(crate) note_id: String,
    pub(crate) content: String,
    pub(crate) version: u64,
    /// Highest version known to be durable in the repository.
    pub(crate) persisted_version: u64,
    pub(crate) participants: HashMap<ConnectionId, Outbox>,
    pub(crate) hydrated: bool,
    pub(crate) evicted: bool,
    /// Serializes repository writes for this note so they land in version order.
    pub(crate) flush_lock: Arc<Mutex<()>>,
}

impl LiveSession {
    fn new(note_id: &str) -> Self {
        Self {
            note_id: note_id.to_string(),
            content: String::new(),
            version: 0,
            persisted_version: 0,
            participants: HashMap::new(),
            hydrated: false,
            evicted: false,
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.hydrated && !self.evicted
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.version > self.persisted_version
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            note_id: self.note_id.clone(),
            content: self.content.clone(),
            version: self.version,
        }
    }
}

pub struct SessionRegistry {
    pub(crate) sessions: Mutex<HashMap<String, Slot>>,
    pub(crate) repo: Arc<dyn NoteRepository>,
    pub(crate) flush_policy: FlushPolicy,
}

impl SessionRegistry {
    pub fn new(repo: Arc<dyn NoteRepository>, flush_policy: FlushPolicy) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            repo,
            flush_policy,
        }
    }

    /// Attaches `conn_id` to the note's session, creating and hydrating the
    /// session on first access. Updates for the note are delivered to `outbox`.
    pub async fn join(
        &self,
        note_id: &str,
        conn_id: ConnectionId,
        outbox: Outbox,
    ) -> PortResult<SessionSnapshot> {
        loop {
            let slot = self.slot_or_insert(note_id).await;
            let mut session = slot.lock().await;
            if session.evicted {
                debug!(note_id = %note_id, "Session evicted while waiting, retrying join");
                continue;
            }

            if !session.hydrated {
                match self.repo.load(note_id).await {
                    Ok(note) => {
                        session.content = note.content;
                        session.version = 0;
                        session.persisted_version = 0;
                        session.hydrated = true;
                        info!(note_id = %note_id, "Session created");
                    }
                    Err(e) => {
                        session.evicted = true;
                        self.remove_slot(note_id, &slot).await;
                        return Err(e);
                    }
                }
            }

            session.participants.insert(conn_id, outbox);
            info!(
                note_id = %note_id,
                conn_id = %conn_id,
                participants = session.participants.len(),
                "Participant joined"
            );
            return Ok(session.snapshot());
        }
    }

    /// Detaches `conn_id`. The last participant out flushes the content to the
    /// repository (with retries) and evicts the session before this returns.
    pub async fn leave(&self, note_id: &str, conn_id: ConnectionId) -> PortResult<()> {
        let slot = self
            .slot(note_id)
            .await
            .ok_or_else(|| no_session(note_id))?;
        let mut session = slot.lock().await;
        if !session.is_live() || session.participants.remove(&conn_id).is_none() {
            return Err(PortError::NotFound(format!(
                "Connection {} is not part of session {}",
                conn_id, note_id
            )));
        }
        info!(
            note_id = %note_id,
            conn_id = %conn_id,
            participants = session.participants.len(),
            "Participant left"
        );

        if session.participants.is_empty() {
            self.flush_and_evict(&slot, &mut session).await;
        }
        Ok(())
    }

    /// The current authoritative state of an active session.
    pub async fn get(&self, note_id: &str) -> PortResult<SessionSnapshot> {
        let slot = self
            .slot(note_id)
            .await
            .ok_or_else(|| no_session(note_id))?;
        let session = slot.lock().await;
        if !session.is_live() {
            return Err(no_session(note_id));
        }
        Ok(session.snapshot())
    }

    pub async fn participant_count(&self, note_id: &str) -> usize {
        let Some(slot) = self.slot(note_id).await else {
            return 0;
        };
        let session = slot.lock().await;
        if session.is_live() {
            session.participants.len()
        } else {
            0
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub(crate) async fn slot(&self, note_id: &str) -> Option<Slot> {
        self.sessions.lock().await.get(note_id).cloned()
    }

    pub(crate) async fn all_slots(&self) -> Vec<Slot> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub(crate) async fn slot_or_insert(&self, note_id: &str) -> Slot {
        self.sessions
            .lock()
            .await
            .entry(note_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LiveSession::new(note_id))))
            .clone()
    }

    /// Removes `slot` from the map unless it has already been replaced.
    pub(crate) async fn remove_slot(&self, note_id: &str, slot: &Slot) {
        let mut sessions = self.sessions.lock().await;
        if sessions
            .get(note_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            sessions.remove(note_id);
        }
    }

    /// Runs with the session lock held, so a racing join waits for the flush
    /// and then hydrates whatever it wrote.
    async fn flush_and_evict(&self, slot: &Slot, session: &mut LiveSession) {
        let note_id = session.note_id.clone();
        if session.is_dirty() {
            let _flush = session.flush_lock.clone().lock_owned().await;
            let result =
                save_with_retry(self.repo.as_ref(), &note_id, &session.content, self.flush_policy)
                    .await;
            match result {
                Ok(()) => {
                    session.persisted_version = session.version;
                    debug!(note_id = %note_id, version = session.version, "Session flushed");
                }
                Err(PortError::NotFound(_)) => {
                    warn!(note_id = %note_id, "Note was deleted while its session was open, content dropped");
                }
                Err(e) => {
                    error!(
                        note_id = %note_id,
                        version = session.version,
                        "Giving up on flushing session, content lost: {}",
                        e
                    );
                }
            }
        }
        session.evicted = true;
        self.remove_slot(&note_id, slot).await;
        info!(note_id = %note_id, "Session evicted");
    }
}

fn no_session(note_id: &str) -> PortError {
    PortError::NotFound(format!("No active session for note {}", note_id))
}
