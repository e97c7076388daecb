//! crates/quickpad_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! The note repository is the only external collaborator the synchronization
//! core talks to; everything behind it (Postgres, memory) lives in adapters.

use async_trait::async_trait;

use crate::domain::Note;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port and by the synchronization core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    /// Unknown note id, or no live session for it.
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Wrong or missing secret for a protected note. The access gate answers
    /// with a granted/denied decision; callers turn a denial into this.
    #[error("Unauthorized")]
    Unauthorized,
    /// The client violated the protocol, e.g. referenced a future version.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// The repository could not be reached or failed an I/O operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl PortError {
    /// Only storage failures are worth retrying; the rest are definitive answers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::StorageUnavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Stores a freshly created note. Fails if the id is already taken.
    async fn create(&self, note: Note) -> PortResult<()>;

    async fn load(&self, note_id: &str) -> PortResult<Note>;

    /// Replaces the content of an existing note. `NotFound` if it was swept.
    async fn save(&self, note_id: &str, content: &str) -> PortResult<()>;

    async fn exists(&self, note_id: &str) -> PortResult<bool>;

    async fn delete(&self, note_id: &str) -> PortResult<()>;
}
