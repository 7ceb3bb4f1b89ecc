//! Core domain types shared by the state machine and its callers.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One of the two seats in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
pub enum Slot {
    /// First player; always acts first.
    #[display("A")]
    A,
    /// Second player.
    #[display("B")]
    B,
}

impl Slot {
    /// Returns the other seat.
    pub fn opponent(self) -> Self {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Pawn squares for both seats. Zero means the pawn has not entered the board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Positions {
    /// Square of seat A.
    pub a: u8,
    /// Square of seat B.
    pub b: u8,
}

impl Positions {
    /// Creates a snapshot.
    pub fn new(a: u8, b: u8) -> Self {
        Self { a, b }
    }

    /// Square of the given seat.
    pub fn get(&self, slot: Slot) -> u8 {
        match slot {
            Slot::A => self.a,
            Slot::B => self.b,
        }
    }

    pub(crate) fn set(&mut self, slot: Slot, square: u8) {
        match slot {
            Slot::A => self.a = square,
            Slot::B => self.b = square,
        }
    }
}

impl std::fmt::Display for Positions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.a, self.b)
    }
}

/// Lifecycle status of one match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum MatchStatus {
    /// Still being played.
    #[display("in progress")]
    InProgress,
    /// The seat reached the winning square.
    #[display("{_0} won")]
    Won(Slot),
    /// Both seats agreed to a draw.
    #[display("draw")]
    Draw,
    /// The seat took an action outside its legal menu, or its agent failed.
    #[display("{_0} lost by illegal move")]
    IllegalMove(Slot),
    /// The seat forfeited.
    #[display("{_0} forfeited")]
    Forfeit(Slot),
    /// The scheduler stopped the match at its turn cap; nobody wins.
    #[display("turn limit reached")]
    TurnLimit,
}

impl MatchStatus {
    /// True while the match can still accept actions.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, MatchStatus::InProgress)
    }

    /// True once the match has ended.
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// The winning seat, if the outcome has one.
    pub fn winner(&self) -> Option<Slot> {
        match self {
            MatchStatus::Won(slot) => Some(*slot),
            MatchStatus::IllegalMove(loser) | MatchStatus::Forfeit(loser) => {
                Some(loser.opponent())
            }
            MatchStatus::InProgress | MatchStatus::Draw | MatchStatus::TurnLimit => None,
        }
    }

    /// Stable code used in persisted records.
    pub fn code(&self) -> &'static str {
        match self {
            MatchStatus::InProgress => "in_progress",
            MatchStatus::Won(Slot::A) => "a_won",
            MatchStatus::Won(Slot::B) => "b_won",
            MatchStatus::Draw => "draw",
            MatchStatus::IllegalMove(Slot::A) => "a_illegal",
            MatchStatus::IllegalMove(Slot::B) => "b_illegal",
            MatchStatus::Forfeit(Slot::A) => "a_forfeit",
            MatchStatus::Forfeit(Slot::B) => "b_forfeit",
            MatchStatus::TurnLimit => "turn_limit",
        }
    }
}

/// Error parsing a [`MatchStatus`] code.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
#[display("unknown match status code: '{code}'")]
pub struct UnknownStatus {
    /// The rejected code.
    pub code: String,
}

impl FromStr for MatchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "in_progress" => MatchStatus::InProgress,
            "a_won" => MatchStatus::Won(Slot::A),
            "b_won" => MatchStatus::Won(Slot::B),
            "draw" => MatchStatus::Draw,
            "a_illegal" => MatchStatus::IllegalMove(Slot::A),
            "b_illegal" => MatchStatus::IllegalMove(Slot::B),
            "a_forfeit" => MatchStatus::Forfeit(Slot::A),
            "b_forfeit" => MatchStatus::Forfeit(Slot::B),
            "turn_limit" => MatchStatus::TurnLimit,
            other => {
                return Err(UnknownStatus {
                    code: other.to_string(),
                });
            }
        })
    }
}
