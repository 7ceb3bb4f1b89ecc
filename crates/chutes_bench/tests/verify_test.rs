//! Tests for checking stored transcripts against their match records.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chutes_bench::{
    ClaimPolicy, MatchExport, MatchStore, MatchSummary, Pairing, VerifyError, verify_export,
};
use chutes_ladders::{BoardTable, Match, MatchStatus, SeededSpinner, Slot};
use tempfile::NamedTempFile;

fn setup_store() -> (NamedTempFile, MatchStore) {
    let db_file = NamedTempFile::new().expect("Failed to create temp file");
    let db_path = db_file.path().to_str().expect("Invalid path").to_string();
    let store = MatchStore::open(db_path).expect("Failed to open store");
    (db_file, store)
}

fn claim(store: &MatchStore) -> Pairing {
    store
        .claim_next_pending("w1", &ClaimPolicy::new(Duration::from_secs(900), 3))
        .expect("Claim failed")
        .expect("Pairing available")
}

/// Plays a full runner-vs-runner match into the store and returns the
/// honest outcome.
fn play_into(store: &MatchStore, pairing: &Pairing) -> (MatchStatus, u32) {
    let mut game = Match::new(Arc::new(BoardTable::standard()), SeededSpinner::new(11));
    let mut seq = 0;
    while game.status().is_in_progress() {
        let action = game.menu()[0].clone();
        let record = game.apply(action).expect("match in progress");
        store
            .record_turn(*pairing.id(), "w1", *pairing.attempts(), seq, &record, &[])
            .expect("Record failed");
        seq += 1;
    }
    (game.status(), game.turns_played())
}

fn commit(store: &MatchStore, pairing: &Pairing, status: MatchStatus, turns: u32) {
    let now = Utc::now().naive_utc();
    store
        .commit_result(pairing, "w1", &MatchSummary::new(status, turns, 11, now, now))
        .expect("Commit failed");
}

fn exported(store: &MatchStore, pairing: &Pairing) -> MatchExport {
    store
        .export()
        .expect("Export failed")
        .into_iter()
        .find(|e| e.record().pairing_id() == pairing.id())
        .expect("Match exported")
}

fn table() -> Arc<BoardTable> {
    Arc::new(BoardTable::standard())
}

fn store_with_pairings() -> (NamedTempFile, MatchStore) {
    let (db, store) = setup_store();
    store
        .enumerate_pairings(&["alpha".to_string(), "beta".to_string()], 2)
        .expect("Enumerate failed");
    (db, store)
}

#[test]
fn test_honest_record_verifies() {
    let (_db, store) = store_with_pairings();
    let pairing = claim(&store);
    let (status, turns) = play_into(&store, &pairing);
    assert!(status.winner().is_some());
    commit(&store, &pairing, status, turns);

    verify_export(table(), &exported(&store, &pairing)).expect("Honest record verifies");
}

#[test]
fn test_inflated_turn_count_is_caught() {
    let (_db, store) = store_with_pairings();
    let pairing = claim(&store);
    let (status, turns) = play_into(&store, &pairing);
    commit(&store, &pairing, status, turns + 3);

    let err = verify_export(table(), &exported(&store, &pairing)).unwrap_err();
    match err {
        VerifyError::Turns { recorded, replayed } => {
            assert_eq!(replayed, turns);
            assert_eq!(recorded, i32::try_from(turns + 3).expect("small count"));
        }
        other => panic!("expected a turn mismatch, got {other}"),
    }
}

#[test]
fn test_wrong_status_is_caught() {
    let (_db, store) = store_with_pairings();
    let pairing = claim(&store);
    let (_, turns) = play_into(&store, &pairing);
    commit(&store, &pairing, MatchStatus::Forfeit(Slot::A), turns);

    assert!(matches!(
        verify_export(table(), &exported(&store, &pairing)),
        Err(VerifyError::Status { .. })
    ));
}

#[test]
fn test_turn_limit_record_accepts_unfinished_replay() {
    let (_db, store) = store_with_pairings();
    let pairing = claim(&store);

    let mut game = Match::new(table(), SeededSpinner::new(11));
    let mut seq = 0;
    while game.completed_turns() < 4 {
        let action = game.menu()[0].clone();
        let record = game.apply(action).expect("match in progress");
        store
            .record_turn(*pairing.id(), "w1", *pairing.attempts(), seq, &record, &[])
            .expect("Record failed");
        seq += 1;
    }
    game.halt_on_turn_limit().expect("match in progress");
    commit(&store, &pairing, game.status(), game.turns_played());

    verify_export(table(), &exported(&store, &pairing)).expect("Turn limit verifies");

    let second = claim(&store);
    let mut game = Match::new(table(), SeededSpinner::new(11));
    let record = game.apply(game.menu()[0].clone()).expect("match in progress");
    store
        .record_turn(*second.id(), "w1", *second.attempts(), 0, &record, &[])
        .expect("Record failed");
    commit(&store, &second, MatchStatus::TurnLimit, 5);

    assert!(matches!(
        verify_export(table(), &exported(&store, &second)),
        Err(VerifyError::Turns { recorded: 5, replayed: 0 })
    ));
}
