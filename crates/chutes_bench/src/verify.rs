//! Replays exported transcripts against their committed records.

use std::sync::Arc;

use chutes_ladders::{BoardTable, Match, MatchStatus, ReplayError, Slot};
use derive_more::{Display, Error};
use tracing::{debug, instrument};

use crate::db::{DbError, MatchExport};

/// Why a committed match does not agree with its transcript.
#[derive(Debug, Display, Error)]
pub enum VerifyError {
    /// The transcript itself does not re-execute.
    #[display("transcript does not replay: {_0}")]
    Replay(ReplayError),
    /// The stored record could not be decoded.
    #[display("record is unreadable: {_0}")]
    Record(DbError),
    /// The replay ends in a different status.
    #[display("recorded status {recorded}, replay ends {replayed}")]
    Status {
        /// Status in the match record.
        recorded: MatchStatus,
        /// Status the replay reaches.
        replayed: MatchStatus,
    },
    /// The replay plays a different number of turns.
    #[display("recorded {recorded} turns, replay plays {replayed}")]
    Turns {
        /// Turn count in the match record.
        recorded: i32,
        /// Turn count of the replay.
        replayed: u32,
    },
    /// The winner column names the wrong contestant.
    #[display("recorded winner {recorded:?}, replay implies {replayed:?}")]
    Winner {
        /// Winner in the match record.
        recorded: Option<String>,
        /// Contestant in the winning seat of the replay.
        replayed: Option<String>,
    },
}

/// Checks that `exported`'s transcript reproduces its status, turn count
/// and winner.
///
/// A `turn_limit` record is accepted when the replay is still in progress,
/// since the halt is not a transcript entry.
///
/// # Errors
///
/// Returns the first [`VerifyError`] found.
#[instrument(skip(table, exported), fields(pairing_id = exported.record().pairing_id()))]
pub fn verify_export(table: Arc<BoardTable>, exported: &MatchExport) -> Result<(), VerifyError> {
    let record = exported.record();
    let replayed = Match::replay(table, exported.transcript()).map_err(VerifyError::Replay)?;
    let recorded = record.parse_status().map_err(VerifyError::Record)?;

    let status = replayed.status();
    let halted = recorded == MatchStatus::TurnLimit && status.is_in_progress();
    if status != recorded && !halted {
        return Err(VerifyError::Status {
            recorded,
            replayed: status,
        });
    }

    let turns = replayed.turns_played();
    if i64::from(*record.turns()) != i64::from(turns) {
        return Err(VerifyError::Turns {
            recorded: *record.turns(),
            replayed: turns,
        });
    }

    let winner = status.winner().map(|slot| match slot {
        Slot::A => record.player_a().clone(),
        Slot::B => record.player_b().clone(),
    });
    if *record.winner() != winner {
        return Err(VerifyError::Winner {
            recorded: record.winner().clone(),
            replayed: winner,
        });
    }

    debug!(%status, turns, "Transcript verified");
    Ok(())
}
