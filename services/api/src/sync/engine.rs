//! services/api/src/sync/engine.rs
//!
//! Applies edits to live sessions and fans the result out to participants.
//!
//! The broadcast is sent while the session lock is still held, so every
//! participant receives updates for a note in version order.

use quickpad_core::domain::{ConnectionId, Edit, EditOutcome, Resolution};
use quickpad_core::ports::{PortError, PortResult};
use quickpad_core::sync::{resolve, Change};
use tracing::{debug, info, warn};

use crate::sync::registry::{LiveSession, SessionRegistry};
use crate::web::protocol::ServerMessage;

impl SessionRegistry {
    /// Applies one edit under version-gated last-write-wins.
    ///
    /// A clean edit is broadcast to everyone but its sender; a rebase goes to
    /// every participant, the sender included. A future base version, or a
    /// change that does not fit the current content, fails with `InvalidState`
    /// and leaves the session untouched.
    pub async fn apply_edit(&self, edit: Edit) -> PortResult<EditOutcome> {
        let slot = self.slot(&edit.note_id).await.ok_or_else(|| {
            PortError::NotFound(format!("No active session for note {}", edit.note_id))
        })?;
        let mut session = slot.lock().await;
        if !session.is_live() {
            return Err(PortError::NotFound(format!(
                "No active session for note {}",
                edit.note_id
            )));
        }
        if !session.participants.contains_key(&edit.sender) {
            return Err(PortError::InvalidState(format!(
                "Connection {} has not joined note {}",
                edit.sender, edit.note_id
            )));
        }

        commit(&mut session, edit.base_version, &edit.change, Some(edit.sender))
    }

    /// Replaces a note's content on behalf of a writer outside the session.
    ///
    /// With a live session the write goes through the same version gate as a
    /// participant's edit and is broadcast to every participant; an omitted
    /// `base_version` counts as 0. Without one, the content is saved straight
    /// to the repository while a placeholder entry is held, so a concurrent
    /// join hydrates the new content. Versions only exist inside a live
    /// session, so such a write reports version 0 and ignores `base_version`.
    pub async fn write_content(
        &self,
        note_id: &str,
        base_version: Option<u64>,
        content: String,
    ) -> PortResult<EditOutcome> {
        loop {
            let slot = self.slot_or_insert(note_id).await;
            let mut session = slot.lock().await;
            if session.evicted {
                continue;
            }

            if session.hydrated {
                let change = Change::Replace(content);
                return commit(&mut session, base_version.unwrap_or(0), &change, None);
            }

            let result = self.repo.save(note_id, &content).await;
            session.evicted = true;
            self.remove_slot(note_id, &slot).await;
            result?;
            debug!(note_id = %note_id, "Content written without a live session");
            return Ok(EditOutcome {
                accepted: true,
                resolution: Resolution::Clean,
                resulting_version: 0,
                resulting_content: content,
            });
        }
    }
}

/// Resolves `change` against the session, bumps the version and broadcasts.
/// `origin` is the participant that sent it, if any; only it is skipped on a
/// clean edit.
fn commit(
    session: &mut LiveSession,
    base_version: u64,
    change: &Change,
    origin: Option<ConnectionId>,
) -> PortResult<EditOutcome> {
    let resolution = resolve(session.version, base_version).inspect_err(|_| {
        warn!(
            note_id = %session.note_id,
            origin = ?origin,
            base_version,
            version = session.version,
            "Edit references a future version"
        );
    })?;
    let content = change.apply(&session.content)?;

    session.version += 1;
    session.content = content;

    let outcome = EditOutcome {
        accepted: true,
        resolution,
        resulting_version: session.version,
        resulting_content: session.content.clone(),
    };

    if resolution == Resolution::Rebase {
        info!(
            note_id = %session.note_id,
            origin = ?origin,
            base_version,
            version = session.version,
            "Stale edit accepted as rebase"
        );
    }

    let update = ServerMessage::Update {
        note_id: session.note_id.clone(),
        version: outcome.resulting_version,
        content: outcome.resulting_content.clone(),
        rebase: outcome.is_rebase(),
    };
    for (conn_id, outbox) in &session.participants {
        if Some(*conn_id) == origin && resolution == Resolution::Clean {
            continue;
        }
        if outbox.send(update.clone()).is_err() {
            debug!(conn_id = %conn_id, "Participant outbox closed, skipping update");
        }
    }

    Ok(outcome)
}
