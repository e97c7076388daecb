//! Tests for `SessionRegistry`: session lifecycle, hydration, eviction and
//! the flush that has to happen in between.

mod common;

use std::time::Duration;

use api_lib::config::FlushPolicy;
use assert_matches::assert_matches;
use common::{drain, outbox, Harness};
use quickpad_core::domain::Edit;
use quickpad_core::ports::{NoteRepository, PortError};
use quickpad_core::sync::Change;
use uuid::Uuid;

fn replace(note_id: &str, base_version: u64, content: &str, sender: Uuid) -> Edit {
    Edit {
        note_id: note_id.to_string(),
        base_version,
        change: Change::Replace(content.to_string()),
        sender,
    }
}

// ---------------------------------------------------------------------------
// Joining
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_join_hydrates_from_the_repository() {
    let h = Harness::new();
    h.seed("abc", "stored text").await;
    let (tx, _rx) = outbox();

    let snapshot = h.registry.join("abc", Uuid::new_v4(), tx).await.unwrap();

    assert_eq!(snapshot.content, "stored text");
    assert_eq!(snapshot.version, 0);
    assert_eq!(h.registry.session_count().await, 1);
    assert_eq!(h.registry.participant_count("abc").await, 1);
}

#[tokio::test]
async fn joining_an_unknown_note_leaves_no_session_behind() {
    let h = Harness::new();
    let (tx, _rx) = outbox();

    let result = h.registry.join("nope", Uuid::new_v4(), tx).await;

    assert_matches!(result, Err(PortError::NotFound(_)));
    assert_eq!(h.registry.session_count().await, 0);
    assert_matches!(h.registry.get("nope").await, Err(PortError::NotFound(_)));
}

#[tokio::test]
async fn storage_failure_on_hydrate_fails_the_join_and_a_retry_succeeds() {
    let h = Harness::new();
    h.seed("abc", "text").await;
    h.repo.fail_loads(1);

    let (tx, _rx) = outbox();
    let first = h.registry.join("abc", Uuid::new_v4(), tx.clone()).await;
    assert_matches!(first, Err(PortError::StorageUnavailable(_)));
    assert_eq!(h.registry.session_count().await, 0);

    let second = h.registry.join("abc", Uuid::new_v4(), tx).await.unwrap();
    assert_eq!(second.content, "text");
}

#[tokio::test]
async fn concurrent_joins_share_one_session() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, _rx_a) = outbox();
    let (tx_b, mut rx_b) = outbox();

    let (ja, jb) = tokio::join!(
        h.registry.join("abc", a, tx_a),
        h.registry.join("abc", b, tx_b),
    );
    ja.unwrap();
    jb.unwrap();

    assert_eq!(h.registry.session_count().await, 1);
    assert_eq!(h.registry.participant_count("abc").await, 2);

    // An edit through one participant is visible to the other at the same version.
    h.registry.apply_edit(replace("abc", 0, "x", a)).await.unwrap();
    assert_eq!(drain(&mut rx_b), vec![common::update("abc", 1, "x", false)]);
    assert_eq!(h.registry.get("abc").await.unwrap().version, 1);
}

// ---------------------------------------------------------------------------
// Leaving, flushing and eviction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn last_leave_flushes_before_eviction_and_rejoin_sees_it() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = outbox();
    h.registry.join("abc", a, tx.clone()).await.unwrap();
    h.registry.join("abc", b, tx.clone()).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "draft", a)).await.unwrap();

    h.registry.leave("abc", a).await.unwrap();
    assert_eq!(h.registry.session_count().await, 1);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some(""));

    h.registry.leave("abc", b).await.unwrap();
    assert_eq!(h.registry.session_count().await, 0);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("draft"));

    let snapshot = h.registry.join("abc", Uuid::new_v4(), tx).await.unwrap();
    assert_eq!(snapshot.content, "draft");
    assert_eq!(snapshot.version, 0);
}

#[tokio::test]
async fn leave_is_not_repeatable() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = outbox();
    h.registry.join("abc", a, tx.clone()).await.unwrap();
    h.registry.join("abc", b, tx).await.unwrap();

    h.registry.leave("abc", a).await.unwrap();
    assert_matches!(h.registry.leave("abc", a).await, Err(PortError::NotFound(_)));
    assert_eq!(h.registry.participant_count("abc").await, 1);
}

#[tokio::test]
async fn untouched_session_is_evicted_without_a_write() {
    let h = Harness::new();
    h.seed("abc", "as stored").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();

    h.registry.leave("abc", conn).await.unwrap();

    assert_eq!(h.repo.save_attempts(), 0);
    assert_eq!(h.registry.session_count().await, 0);
}

#[tokio::test]
async fn eviction_flush_retries_transient_failures() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "keep me", conn)).await.unwrap();
    h.repo.fail_saves(2);

    h.registry.leave("abc", conn).await.unwrap();

    assert_eq!(h.repo.save_attempts(), 3);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("keep me"));
    assert_eq!(h.registry.session_count().await, 0);
}

#[tokio::test]
async fn exhausted_retry_budget_still_evicts() {
    let h = Harness::new();
    h.seed("abc", "old").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "new", conn)).await.unwrap();
    h.repo.fail_saves(100);

    h.registry.leave("abc", conn).await.unwrap();

    assert_eq!(h.repo.save_attempts(), 3);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("old"));
    assert_eq!(h.registry.session_count().await, 0);
}

#[tokio::test]
async fn swept_note_is_evicted_without_retrying() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "orphan", conn)).await.unwrap();
    h.repo.delete("abc").await.unwrap();

    h.registry.leave("abc", conn).await.unwrap();

    assert_eq!(h.repo.save_attempts(), 1);
    assert_eq!(h.registry.session_count().await, 0);
    assert_eq!(h.repo.content_of("abc").await, None);
}

#[tokio::test]
async fn join_racing_an_eviction_waits_for_the_flush() {
    let h = Harness::with_policy(FlushPolicy {
        max_attempts: 2,
        base_backoff: Duration::from_millis(100),
    });
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx.clone()).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "in flight", conn)).await.unwrap();

    // The first save fails, so the leaving side sits in backoff holding the session.
    h.repo.fail_saves(1);
    let registry = h.registry.clone();
    let leaving = tokio::spawn(async move { registry.leave("abc", conn).await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snapshot = h.registry.join("abc", Uuid::new_v4(), tx).await.unwrap();

    leaving.await.unwrap().unwrap();
    assert_eq!(snapshot.content, "in flight");
    assert_eq!(h.registry.session_count().await, 1);
    assert_eq!(h.registry.participant_count("abc").await, 1);
}

#[tokio::test]
async fn periodic_flush_writes_only_dirty_sessions() {
    let h = Harness::new();
    h.seed("abc", "").await;
    h.seed("def", "").await;
    let (a, d) = (Uuid::new_v4(), Uuid::new_v4());
    let (tx, _rx) = outbox();
    h.registry.join("abc", a, tx.clone()).await.unwrap();
    h.registry.join("def", d, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "changed", a)).await.unwrap();

    assert_eq!(h.registry.flush_dirty().await, 1);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("changed"));
    assert_eq!(h.registry.flush_dirty().await, 0);

    // Already durable, so eviction has nothing left to write.
    h.registry.leave("abc", a).await.unwrap();
    assert_eq!(h.repo.save_attempts(), 1);
}

#[tokio::test]
async fn edit_during_a_periodic_save_stays_dirty() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "first", conn)).await.unwrap();

    let held = h.repo.hold_next_save();
    let registry = h.registry.clone();
    let periodic = tokio::spawn(async move { registry.flush_dirty().await });
    held.started().await;

    // The periodic save runs outside the session lock, so edits keep flowing.
    h.registry.apply_edit(replace("abc", 1, "second", conn)).await.unwrap();
    held.release();
    assert_eq!(periodic.await.unwrap(), 1);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("first"));

    // Version 1 is durable, version 2 is not.
    assert_eq!(h.registry.flush_dirty().await, 1);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("second"));
    assert_eq!(h.registry.flush_dirty().await, 0);
}

#[tokio::test]
async fn eviction_save_lands_after_an_in_flight_periodic_save() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "first", conn)).await.unwrap();

    let held = h.repo.hold_next_save();
    let registry = h.registry.clone();
    let periodic = tokio::spawn(async move { registry.flush_dirty().await });
    held.started().await;

    h.registry.apply_edit(replace("abc", 1, "final", conn)).await.unwrap();
    let registry = h.registry.clone();
    let leaving = tokio::spawn(async move { registry.leave("abc", conn).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!leaving.is_finished(), "eviction must wait for the older save");
    assert_eq!(h.repo.save_attempts(), 1);

    held.release();
    assert_eq!(periodic.await.unwrap(), 1);
    leaving.await.unwrap().unwrap();

    assert_eq!(h.repo.save_attempts(), 2);
    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("final"));
    assert_eq!(h.registry.session_count().await, 0);
}

#[tokio::test]
async fn shutdown_flush_keeps_sessions_registered() {
    let h = Harness::new();
    h.seed("abc", "").await;
    let conn = Uuid::new_v4();
    let (tx, _rx) = outbox();
    h.registry.join("abc", conn, tx).await.unwrap();
    h.registry.apply_edit(replace("abc", 0, "bye", conn)).await.unwrap();
    h.repo.fail_saves(1);

    h.registry.flush_all().await;

    assert_eq!(h.repo.content_of("abc").await.as_deref(), Some("bye"));
    assert_eq!(h.registry.session_count().await, 1);
}
