//! Shared fixtures for the synchronization tests.
//!
//! Everything runs against `InMemoryNoteRepository`; flush backoff is shrunk to
//! a millisecond so retry paths stay fast.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api_lib::adapters::InMemoryNoteRepository;
use api_lib::config::FlushPolicy;
use api_lib::sync::gate::hash_password;
use api_lib::sync::{AccessGate, SessionRegistry};
use api_lib::web::connection::Connection;
use api_lib::web::protocol::{Outbox, ServerMessage};
use chrono::{Duration as ChronoDuration, Utc};
use quickpad_core::domain::Note;
use quickpad_core::ports::NoteRepository;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use uuid::Uuid;

pub const PASSWORD: &str = "open sesame";

pub struct Harness {
    pub repo: Arc<InMemoryNoteRepository>,
    pub registry: Arc<SessionRegistry>,
    pub gate: Arc<AccessGate>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(fast_policy())
    }

    pub fn with_policy(policy: FlushPolicy) -> Self {
        let repo = Arc::new(InMemoryNoteRepository::new());
        let registry = Arc::new(SessionRegistry::new(repo.clone(), policy));
        let gate = Arc::new(AccessGate::new(repo.clone()));
        Self {
            repo,
            registry,
            gate,
        }
    }

    pub async fn seed(&self, id: &str, content: &str) {
        self.repo.create(note(id, content, None)).await.unwrap();
    }

    pub async fn seed_protected(&self, id: &str, content: &str) {
        self.repo
            .create(note(id, content, Some(password_hash().to_string())))
            .await
            .unwrap();
    }

    /// A state-machine connection plus the receiving end of its outbox.
    pub fn connect(&self) -> (Connection, UnboundedReceiver<ServerMessage>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(Uuid::new_v4(), self.registry.clone(), self.gate.clone(), outbox);
        (conn, rx)
    }
}

pub fn fast_policy() -> FlushPolicy {
    FlushPolicy {
        max_attempts: 3,
        base_backoff: Duration::from_millis(1),
    }
}

pub fn note(id: &str, content: &str, password_hash: Option<String>) -> Note {
    Note {
        id: id.to_string(),
        content: content.to_string(),
        password_hash,
        created_at: Utc::now(),
        expires_at: Utc::now() + ChronoDuration::hours(24),
    }
}

/// Hashing is deliberately slow, so the suite shares one hash of `PASSWORD`.
pub fn password_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password(PASSWORD).expect("hashing should succeed"))
}

pub fn outbox() -> (Outbox, UnboundedReceiver<ServerMessage>) {
    mpsc::unbounded_channel()
}

/// Everything queued so far, without waiting.
pub fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

pub fn update(note_id: &str, version: u64, content: &str, rebase: bool) -> ServerMessage {
    ServerMessage::Update {
        note_id: note_id.to_string(),
        version,
        content: content.to_string(),
        rebase,
    }
}
