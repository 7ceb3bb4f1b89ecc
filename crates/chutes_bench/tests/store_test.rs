//! Tests for the persistent store.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;
use chutes_bench::{
    ClaimPolicy, CommitOutcome, DbErrorKind, LlmError, LlmInvocation, LlmProvider, MatchStore,
    MatchSummary, PairingStatus, TokenUsage, ToolCall,
};
use chutes_ladders::{Action, BoardTable, Match, MatchStatus, ScriptedSpinner, Slot, TurnRecord};
use serde_json::json;
use tempfile::NamedTempFile;

/// Creates a temporary database file with schema applied, returns the file
/// handle (must stay in scope to keep the file alive) and a ready store.
fn setup_store() -> (NamedTempFile, MatchStore) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();
    let store = MatchStore::open(db_path).expect("Failed to open store");
    (db_file, store)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn policy() -> ClaimPolicy {
    ClaimPolicy::new(Duration::from_secs(900), 3)
}

fn spin_record() -> TurnRecord {
    let mut game = Match::new(Arc::new(BoardTable::standard()), ScriptedSpinner::new(vec![3]));
    game.apply(Action::Spin).expect("Match in progress")
}

fn tool_invocation() -> LlmInvocation {
    LlmInvocation::new(
        LlmProvider::Anthropic,
        "claude-test".to_string(),
        json!({"system": "rules", "messages": [{"role": "user", "content": "Turn 1"}]}),
        Some(json!({"content": [{"type": "tool_use", "name": "spin_spinner", "input": {}}]})),
        Some(ToolCall::new("spin_spinner".to_string(), json!({}))),
        TokenUsage::new(Some(812), Some(31)),
        640,
        None,
    )
}

fn failed_invocation() -> LlmInvocation {
    let err = LlmError::Transport {
        provider: LlmProvider::Anthropic,
        message: "connection reset".to_string(),
    };
    LlmInvocation::failed(
        LlmProvider::Anthropic,
        "claude-test",
        json!({"messages": []}),
        Duration::from_millis(90),
        &err,
    )
}

fn forfeit_summary() -> MatchSummary {
    let now = Utc::now().naive_utc();
    MatchSummary::new(MatchStatus::Forfeit(Slot::B), 2, 42, now, now)
}

#[test]
fn test_enumerate_is_idempotent() {
    let (_db, store) = setup_store();
    let contestants = names(&["alpha", "beta", "gamma"]);

    let first = store.enumerate_pairings(&contestants, 2).expect("Enumerate failed");
    assert_eq!(first, 12);

    let second = store.enumerate_pairings(&contestants, 2).expect("Enumerate failed");
    assert_eq!(second, 0);

    let pairings = store.list_pairings().expect("List failed");
    assert_eq!(pairings.len(), 12);
    assert!(pairings.iter().all(|p| p.player_a() != p.player_b()));
    assert_eq!(pairings[0].player_a(), "alpha");
    assert_eq!(pairings[0].player_b(), "beta");
    assert_eq!(*pairings[0].trial(), 0);
}

#[test]
fn test_enumerate_adds_new_trials_only() {
    let (_db, store) = setup_store();
    let contestants = names(&["alpha", "beta"]);
    store.enumerate_pairings(&contestants, 1).expect("Enumerate failed");

    let added = store.enumerate_pairings(&contestants, 3).expect("Enumerate failed");
    assert_eq!(added, 4);
    assert_eq!(store.progress().expect("Progress failed").total(), &6);
}

#[test]
fn test_claim_returns_none_when_empty() {
    let (_db, store) = setup_store();
    let claimed = store.claim_next_pending("w1", &policy()).expect("Claim failed");
    assert!(claimed.is_none());
}

#[test]
fn test_concurrent_claims_single_winner() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");
    store
        .claim_next_pending("setup", &policy())
        .expect("Claim failed")
        .expect("Pairing available");

    let callers = 8;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|i| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                store
                    .claim_next_pending(&format!("w{}", i), &policy())
                    .expect("Claim failed")
            })
        })
        .collect();

    let winners: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().expect("Thread panicked"))
        .collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(*winners[0].attempts(), 1);
}

#[test]
fn test_release_and_reclaim() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");

    let first = store
        .claim_next_pending("w1", &policy())
        .expect("Claim failed")
        .expect("Pairing available");
    store
        .release_claim(*first.id(), "w1", "provider exploded")
        .expect("Release failed");

    let released = store
        .pairing(*first.id())
        .expect("Query failed")
        .expect("Pairing exists");
    assert_eq!(released.parse_status().expect("Valid status"), PairingStatus::Failed);
    assert_eq!(released.last_error().as_deref(), Some("provider exploded"));
    assert!(released.claimed_by().is_none());

    let again = store
        .claim_next_pending("w2", &policy())
        .expect("Claim failed")
        .expect("Pairing available");
    assert_eq!(again.id(), first.id());
    assert_eq!(*again.attempts(), 2);

    let events: Vec<String> = store
        .claim_history(*first.id())
        .expect("History failed")
        .iter()
        .map(|e| e.event().clone())
        .collect();
    assert_eq!(events, ["claimed", "released", "reclaimed"]);

    let progress = store.progress().expect("Progress failed");
    assert_eq!(*progress.retried(), 1);
}

#[test]
fn test_release_by_non_owner_fails() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");
    let pairing = store
        .claim_next_pending("w1", &policy())
        .expect("Claim failed")
        .expect("Pairing available");

    let err = store
        .release_claim(*pairing.id(), "intruder", "nope")
        .unwrap_err();
    assert_eq!(err.kind, DbErrorKind::ClaimLost);
}

#[test]
fn test_stale_claim_is_reclaimed() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");

    let abandoned = store
        .claim_next_pending("w1", &policy())
        .expect("Claim failed")
        .expect("Pairing available");

    // A live claim is skipped.
    let other = store
        .claim_next_pending("w2", &policy())
        .expect("Claim failed")
        .expect("Pairing available");
    assert_ne!(other.id(), abandoned.id());

    std::thread::sleep(Duration::from_millis(20));
    let impatient = ClaimPolicy::new(Duration::from_millis(1), 3);
    let taken = store
        .claim_next_pending("w3", &impatient)
        .expect("Claim failed")
        .expect("Stale pairing available");
    assert_eq!(taken.id(), abandoned.id());
    assert_eq!(taken.claimed_by().as_deref(), Some("w3"));

    let err = store
        .record_turn(
            *abandoned.id(),
            "w1",
            *abandoned.attempts(),
            0,
            &spin_record(),
            &[tool_invocation()],
        )
        .unwrap_err();
    assert_eq!(err.kind, DbErrorKind::ClaimLost);
    assert!(
        store
            .invocations(*abandoned.id(), *abandoned.attempts())
            .expect("Invocations failed")
            .is_empty()
    );

    let err = store
        .commit_result(&abandoned, "w1", &forfeit_summary())
        .unwrap_err();
    assert_eq!(err.kind, DbErrorKind::ClaimLost);
    assert!(store.match_record(*abandoned.id()).expect("Query failed").is_none());
}

#[test]
fn test_max_attempts_stops_reclaiming() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");
    let once = ClaimPolicy::new(Duration::from_secs(900), 1);

    for worker in ["w1", "w2"] {
        let pairing = store
            .claim_next_pending(worker, &once)
            .expect("Claim failed")
            .expect("Pairing available");
        store
            .release_claim(*pairing.id(), worker, "failed")
            .expect("Release failed");
    }

    assert!(store.claim_next_pending("w3", &once).expect("Claim failed").is_none());
    assert_eq!(*store.progress().expect("Progress failed").failed(), 2);
}

#[test]
fn test_commit_result_is_idempotent() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");
    let pairing = store
        .claim_next_pending("w1", &policy())
        .expect("Claim failed")
        .expect("Pairing available");

    let record = spin_record();
    store
        .record_turn(*pairing.id(), "w1", *pairing.attempts(), 0, &record, &[])
        .expect("Record failed");

    let outcome = store
        .commit_result(&pairing, "w1", &forfeit_summary())
        .expect("Commit failed");
    assert_eq!(outcome, CommitOutcome::Committed);

    let again = store
        .commit_result(&pairing, "w1", &forfeit_summary())
        .expect("Commit failed");
    assert_eq!(again, CommitOutcome::AlreadyCompleted);

    let stored = store
        .match_record(*pairing.id())
        .expect("Query failed")
        .expect("Record exists");
    assert_eq!(stored.status(), "b_forfeit");
    assert_eq!(stored.winner().as_deref(), Some("alpha"));
    assert_eq!(*stored.turns(), 2);
    assert_eq!(store.match_records().expect("Query failed").len(), 1);

    let transcript = store
        .transcript(*pairing.id(), *pairing.attempts())
        .expect("Transcript failed");
    assert_eq!(transcript, vec![record]);

    let progress = store.progress().expect("Progress failed");
    assert_eq!(*progress.completed(), 1);
    assert_eq!(*progress.pending(), 1);
    assert!(!progress.is_complete());
}

#[test]
fn test_completed_pairings_are_never_claimed() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");

    for _ in 0..2 {
        let pairing = store
            .claim_next_pending("w1", &policy())
            .expect("Claim failed")
            .expect("Pairing available");
        store
            .commit_result(&pairing, "w1", &forfeit_summary())
            .expect("Commit failed");
    }

    let impatient = ClaimPolicy::new(Duration::ZERO, 10);
    assert!(store.claim_next_pending("w2", &impatient).expect("Claim failed").is_none());
    assert!(store.progress().expect("Progress failed").is_complete());
}

#[test]
fn test_invocations_round_trip_with_their_turn() {
    let (_db, store) = setup_store();
    store
        .enumerate_pairings(&names(&["alpha", "beta"]), 1)
        .expect("Enumerate failed");
    let pairing = store
        .claim_next_pending("w1", &policy())
        .expect("Claim failed")
        .expect("Pairing available");
    let (id, attempt) = (*pairing.id(), *pairing.attempts());

    let calls = vec![failed_invocation(), tool_invocation()];
    store
        .record_turn(id, "w1", attempt, 0, &spin_record(), &calls)
        .expect("Record failed");
    store
        .record_turn(id, "w1", attempt, 1, &spin_record(), &[])
        .expect("Record failed");
    store
        .record_turn(id, "w1", attempt, 2, &spin_record(), &[tool_invocation()])
        .expect("Record failed");

    let stored = store.invocations(id, attempt).expect("Invocations failed");
    let positions: Vec<(i32, i32)> = stored
        .iter()
        .map(|call| (*call.seq(), *call.call_index()))
        .collect();
    assert_eq!(positions, [(0, 0), (0, 1), (2, 0)]);

    assert_eq!(stored[0].invocation(), &failed_invocation());
    assert_eq!(
        stored[0].invocation().error().as_deref(),
        Some("anthropic request failed: connection reset")
    );
    assert!(stored[0].invocation().response().is_none());
    assert_eq!(*stored[0].invocation().latency_ms(), 90);

    assert_eq!(stored[1].invocation(), &tool_invocation());
    assert_eq!(stored[1].invocation().usage().input_tokens, Some(812));

    assert!(store.invocations(id, attempt + 1).expect("Invocations failed").is_empty());
}
