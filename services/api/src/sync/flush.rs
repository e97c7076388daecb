//! services/api/src/sync/flush.rs
//!
//! Writing authoritative session content back to the note repository.
//!
//! Edits are broadcast before they are durable. A background task persists
//! dirty sessions on an interval without holding the session lock during the
//! write; eviction and shutdown flush with the retry budget from `FlushPolicy`.

use std::sync::Arc;
use std::time::Duration;

use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FlushPolicy;
use crate::sync::registry::SessionRegistry;

/// Saves `content`, retrying `StorageUnavailable` with exponential backoff.
/// Any other error is returned at once.
pub async fn save_with_retry(
    repo: &dyn NoteRepository,
    note_id: &str,
    content: &str,
    policy: FlushPolicy,
) -> PortResult<()> {
    let mut delay = policy.base_backoff;
    for attempt in 1..=policy.max_attempts {
        match repo.save(note_id, content).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                warn!(
                    note_id = %note_id,
                    attempt,
                    max_attempts = policy.max_attempts,
                    "Flush failed, retrying in {:?}: {}",
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
    Err(PortError::StorageUnavailable(format!(
        "no flush attempts allowed for note {}",
        note_id
    )))
}

impl SessionRegistry {
    /// Persists every live session whose content is ahead of the repository.
    ///
    /// One attempt per session; failures are left for the next round or for
    /// eviction. Returns how many sessions were written.
    pub async fn flush_dirty(&self) -> usize {
        let mut flushed = 0;
        for slot in self.all_slots().await {
            let (note_id, content, version, flush_guard) = {
                let session = slot.lock().await;
                if !session.is_live() || !session.is_dirty() {
                    continue;
                }
                // Busy only while another save for this note is in flight.
                let Ok(guard) = session.flush_lock.clone().try_lock_owned() else {
                    continue;
                };
                (
                    session.note_id.clone(),
                    session.content.clone(),
                    session.version,
                    guard,
                )
            };

            let result = self.repo.save(&note_id, &content).await;
            drop(flush_guard);

            match result {
                Ok(()) => {
                    let mut session = slot.lock().await;
                    session.persisted_version = session.persisted_version.max(version);
                    flushed += 1;
                    debug!(note_id = %note_id, version, "Periodic flush complete");
                }
                Err(e) => {
                    warn!(note_id = %note_id, version, "Periodic flush failed: {}", e);
                }
            }
        }
        flushed
    }

    /// Flushes every dirty session with the full retry budget. Used at shutdown;
    /// sessions stay registered.
    pub async fn flush_all(&self) {
        for slot in self.all_slots().await {
            let mut session = slot.lock().await;
            if !session.is_live() || !session.is_dirty() {
                continue;
            }
            let _flush = session.flush_lock.clone().lock_owned().await;
            let note_id = session.note_id.clone();
            let result =
                save_with_retry(self.repo.as_ref(), &note_id, &session.content, self.flush_policy)
                    .await;
            match result {
                Ok(()) => session.persisted_version = session.version,
                Err(e) => error!(note_id = %note_id, "Shutdown flush failed, content lost: {}", e),
            }
        }
    }
}

/// Spawns the periodic flusher. It stops when `shutdown` is cancelled.
pub fn start_flusher(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Periodic flusher stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let flushed = registry.flush_dirty().await;
                    if flushed > 0 {
                        debug!(flushed, "Periodic flush round");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryNoteRepository;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use quickpad_core::domain::Note;

    fn policy(max_attempts: u32) -> FlushPolicy {
        FlushPolicy {
            max_attempts,
            base_backoff: Duration::from_millis(1),
        }
    }

    async fn repo_with_note() -> InMemoryNoteRepository {
        let repo = InMemoryNoteRepository::new();
        repo.create(Note {
            id: "abc".to_string(),
            content: String::new(),
            password_hash: None,
            created_at: Utc::now(),
            expires_at: Utc::now(),
        })
        .await
        .unwrap();
        repo
    }

    #[tokio::test]
    async fn retries_until_the_save_lands() {
        let repo = repo_with_note().await;
        repo.fail_saves(2);

        save_with_retry(&repo, "abc", "hello", policy(3)).await.unwrap();

        assert_eq!(repo.save_attempts(), 3);
        assert_eq!(repo.content_of("abc").await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn gives_up_after_the_budget() {
        let repo = repo_with_note().await;
        repo.fail_saves(10);

        let result = save_with_retry(&repo, "abc", "hello", policy(3)).await;

        assert_matches!(result, Err(PortError::StorageUnavailable(_)));
        assert_eq!(repo.save_attempts(), 3);
    }

    #[tokio::test]
    async fn missing_note_is_not_retried() {
        let repo = InMemoryNoteRepository::new();

        let result = save_with_retry(&repo, "gone", "hello", policy(5)).await;

        assert_matches!(result, Err(PortError::NotFound(_)));
        assert_eq!(repo.save_attempts(), 1);
    }
}
