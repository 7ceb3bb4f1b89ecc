//! Chutes & Ladders rules engine.
//!
//! Pure game logic with no I/O: the special-square table, the action
//! vocabulary and the per-match state machine that validates every agent
//! request against the current legal menu.
//!
//! # Architecture
//!
//! - **Board**: validated ladder/chute table and landing arithmetic
//! - **Actions**: the closed set of requests an agent may make
//! - **Spinner**: seeded and scripted sources of 1-6 values
//! - **Match**: turn phases, legality, draw offers and the transcript
//!
//! # Example
//!
//! ```
//! use chutes_ladders::{Action, BoardTable, Match, MatchStatus, ScriptedSpinner};
//! use std::sync::Arc;
//!
//! let mut game = Match::new(Arc::new(BoardTable::standard()), ScriptedSpinner::new(vec![3]));
//! game.apply(Action::Spin).unwrap();
//! assert_eq!(game.positions().a, 3);
//! game.apply(Action::EndTurn).unwrap();
//! game.apply(Action::Forfeit).unwrap();
//! assert_eq!(game.status(), MatchStatus::Forfeit(chutes_ladders::Slot::B));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod action;
mod board;
mod game;
mod spinner;
mod types;

pub use action::{Action, ActionKind};
pub use board::{
    BoardError, BoardTable, Landing, ResolvedSquare, Transition, TransitionKind, SPINNER_MAX,
    STANDARD_TRANSITIONS, WIN_SQUARE,
};
pub use game::{
    IllegalAction, Match, MatchError, MatchView, Phase, ReplayError, TurnRecord, Verdict,
};
pub use spinner::{ScriptedSpinner, SeededSpinner, Spinner};
pub use types::{MatchStatus, Positions, Slot, UnknownStatus};
