//! services/api/src/adapters/memory.rs
//!
//! An in-process `NoteRepository`. Used when no `DATABASE_URL` is configured and
//! throughout the test suite, where its fault injection stands in for an
//! unreachable database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use quickpad_core::domain::Note;
use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use tokio::sync::{Notify, RwLock};

#[derive(Default)]
pub struct InMemoryNoteRepository {
    notes: RwLock<HashMap<String, Note>>,
    failing_loads: AtomicU32,
    failing_saves: AtomicU32,
    save_attempts: AtomicU32,
    held_save: Mutex<Option<HeldSave>>,
}

/// A `save` parked by `InMemoryNoteRepository::hold_next_save`.
#[derive(Clone, Default)]
pub struct HeldSave {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl HeldSave {
    /// Resolves once the held save has been called and is waiting.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Lets the held save write and return.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

impl InMemoryNoteRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` calls to `load` fail with `StorageUnavailable`.
    pub fn fail_loads(&self, count: u32) {
        self.failing_loads.store(count, Ordering::SeqCst);
    }

    /// The next `count` calls to `save` fail with `StorageUnavailable`.
    pub fn fail_saves(&self, count: u32) {
        self.failing_saves.store(count, Ordering::SeqCst);
    }

    /// The next call to `save` waits, before touching the store, until the
    /// returned handle is released.
    pub fn hold_next_save(&self) -> HeldSave {
        let held = HeldSave::default();
        if let Ok(mut slot) = self.held_save.lock() {
            *slot = Some(held.clone());
        }
        held
    }

    /// Number of `save` calls made so far, failed ones included.
    pub fn save_attempts(&self) -> u32 {
        self.save_attempts.load(Ordering::SeqCst)
    }

    /// Stored content of a note, bypassing fault injection.
    pub async fn content_of(&self, note_id: &str) -> Option<String> {
        self.notes
            .read()
            .await
            .get(note_id)
            .map(|note| note.content.clone())
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NoteRepository for InMemoryNoteRepository {
    async fn create(&self, note: Note) -> PortResult<()> {
        let mut notes = self.notes.write().await;
        if notes.contains_key(&note.id) {
            return Err(PortError::InvalidState(format!(
                "Note id {} is already taken",
                note.id
            )));
        }
        notes.insert(note.id.clone(), note);
        Ok(())
    }

    async fn load(&self, note_id: &str) -> PortResult<Note> {
        if Self::take_failure(&self.failing_loads) {
            return Err(PortError::StorageUnavailable("injected load failure".to_string()));
        }
        self.notes
            .read()
            .await
            .get(note_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Note {} not found", note_id)))
    }

    async fn save(&self, note_id: &str, content: &str) -> PortResult<()> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let held = self.held_save.lock().ok().and_then(|mut slot| slot.take());
        if let Some(held) = held {
            held.started.notify_one();
            held.release.notified().await;
        }
        if Self::take_failure(&self.failing_saves) {
            return Err(PortError::StorageUnavailable("injected save failure".to_string()));
        }
        let mut notes = self.notes.write().await;
        let note = notes
            .get_mut(note_id)
            .ok_or_else(|| PortError::NotFound(format!("Note {} not found", note_id)))?;
        note.content = content.to_string();
        Ok(())
    }

    async fn exists(&self, note_id: &str) -> PortResult<bool> {
        Ok(self.notes.read().await.contains_key(note_id))
    }

    async fn delete(&self, note_id: &str) -> PortResult<()> {
        self.notes
            .write()
            .await
            .remove(note_id)
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("Note {} not found", note_id)))
    }
}
