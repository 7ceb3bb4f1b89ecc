//! Board geometry: the special-square table and movement arithmetic.

use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::instrument;

/// The winning square. Landing exactly here ends the match.
pub const WIN_SQUARE: u8 = 100;

/// Highest value the spinner can produce.
pub const SPINNER_MAX: u8 = 6;

/// The classic board: ladders go up, chutes go down.
pub const STANDARD_TRANSITIONS: [(u8, u8); 19] = [
    // Ladders
    (1, 38),
    (4, 14),
    (9, 31),
    (21, 42),
    (28, 84),
    (36, 44),
    (51, 67),
    (71, 91),
    (80, 100),
    // Chutes
    (16, 6),
    (47, 26),
    (49, 11),
    (56, 53),
    (62, 19),
    (64, 60),
    (87, 24),
    (93, 73),
    (95, 75),
    (98, 78),
];

/// Direction of a special-square transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum TransitionKind {
    /// Foot of a ladder; the pawn climbs.
    #[display("ladder")]
    Ladder,
    /// Head of a chute; the pawn slides down.
    #[display("chute")]
    Chute,
}

/// A resolved special square: base, destination and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    /// Square the pawn landed on.
    pub base: u8,
    /// Square the pawn must end up on.
    pub destination: u8,
    /// Ladder or chute.
    pub kind: TransitionKind,
}

/// What a raw landing square means on this board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Landing {
    /// The sum passed the winning square; the pawn does not move.
    Overshoot,
    /// The sum is exactly the winning square.
    Win,
    /// An ordinary square.
    Plain,
    /// A ladder foot; the pawn must climb to `destination`.
    Ladder {
        /// Top of the ladder.
        destination: u8,
    },
    /// A chute head; the pawn must slide to `destination`.
    Chute {
        /// Bottom of the chute.
        destination: u8,
    },
}

/// Result of [`BoardTable::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedSquare {
    raw: u16,
    landing: Landing,
}

impl ResolvedSquare {
    /// The unclamped sum `square + delta`.
    pub fn raw(&self) -> u16 {
        self.raw
    }

    /// Classification of the raw sum.
    pub fn landing(&self) -> Landing {
        self.landing
    }

    /// True unless the sum overshoots the winning square.
    pub fn is_legal_landing(&self) -> bool {
        !matches!(self.landing, Landing::Overshoot)
    }

    /// True when the raw sum is exactly the winning square.
    pub fn is_win(&self) -> bool {
        matches!(self.landing, Landing::Win)
    }

    /// Landing square, or `None` on overshoot.
    pub fn landing_square(&self) -> Option<u8> {
        if self.is_legal_landing() {
            u8::try_from(self.raw).ok()
        } else {
            None
        }
    }

    /// Square the pawn rests on once any transition has been taken.
    pub fn final_square(&self) -> Option<u8> {
        match self.landing {
            Landing::Overshoot => None,
            Landing::Ladder { destination } | Landing::Chute { destination } => Some(destination),
            Landing::Win | Landing::Plain => self.landing_square(),
        }
    }
}

/// Reasons a special-square table is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum BoardError {
    /// A base or destination is outside 1..=100.
    #[display("square {_0} is outside 1..=100")]
    OutOfRange(#[error(not(source))] u8),
    /// A base maps to itself.
    #[display("square {_0} maps to itself")]
    SelfLoop(#[error(not(source))] u8),
    /// The winning square cannot be a base.
    #[display("the winning square cannot start a transition")]
    WinningBase,
    /// The same base appears twice.
    #[display("square {_0} has more than one transition")]
    DuplicateBase(#[error(not(source))] u8),
    /// A destination is itself a base, which would require chained resolution.
    #[display("destination {destination} of {base} is itself a transition base")]
    Chained {
        /// Base whose destination chains.
        base: u8,
        /// The chaining destination.
        destination: u8,
    },
}

/// Validated mapping of special-square bases to destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardTable {
    transitions: BTreeMap<u8, u8>,
}

impl BoardTable {
    /// Validates and builds a table from `(base, destination)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError`] if any pair is out of range, loops onto itself,
    /// starts on the winning square, duplicates a base, or chains into
    /// another base.
    #[instrument(skip(pairs))]
    pub fn new(pairs: impl IntoIterator<Item = (u8, u8)>) -> Result<Self, BoardError> {
        let mut transitions = BTreeMap::new();
        for (base, destination) in pairs {
            for square in [base, destination] {
                if !(1..=WIN_SQUARE).contains(&square) {
                    return Err(BoardError::OutOfRange(square));
                }
            }
            if base == destination {
                return Err(BoardError::SelfLoop(base));
            }
            if base == WIN_SQUARE {
                return Err(BoardError::WinningBase);
            }
            if transitions.insert(base, destination).is_some() {
                return Err(BoardError::DuplicateBase(base));
            }
        }

        if let Some((&base, &destination)) = transitions
            .iter()
            .find(|(_, destination)| transitions.contains_key(*destination))
        {
            return Err(BoardError::Chained { base, destination });
        }

        tracing::debug!(count = transitions.len(), "Board table validated");
        Ok(Self { transitions })
    }

    /// The classic board.
    pub fn standard() -> Self {
        Self {
            transitions: STANDARD_TRANSITIONS.into_iter().collect(),
        }
    }

    /// Looks up the transition starting at `square`, if any.
    pub fn transition(&self, square: u8) -> Option<Transition> {
        self.transitions.get(&square).map(|&destination| Transition {
            base: square,
            destination,
            kind: if destination > square {
                TransitionKind::Ladder
            } else {
                TransitionKind::Chute
            },
        })
    }

    /// Iterates over all transitions in base order.
    pub fn transitions(&self) -> impl Iterator<Item = Transition> + '_ {
        self.transitions
            .keys()
            .filter_map(|&base| self.transition(base))
    }

    /// Computes where a pawn on `square` lands after moving `delta`.
    ///
    /// The board neither wraps nor bounces: a sum past the winning square
    /// is reported as [`Landing::Overshoot`] and the caller keeps the pawn
    /// where it is.
    pub fn resolve(&self, square: u8, delta: u8) -> ResolvedSquare {
        let raw = u16::from(square) + u16::from(delta);
        let landing = if raw > u16::from(WIN_SQUARE) {
            Landing::Overshoot
        } else if raw == u16::from(WIN_SQUARE) {
            Landing::Win
        } else {
            // raw <= 99 here
            match self.transition(raw as u8) {
                Some(Transition {
                    destination,
                    kind: TransitionKind::Ladder,
                    ..
                }) => Landing::Ladder { destination },
                Some(Transition {
                    destination,
                    kind: TransitionKind::Chute,
                    ..
                }) => Landing::Chute { destination },
                None => Landing::Plain,
            }
        };
        ResolvedSquare { raw, landing }
    }

    /// Renders the table one transition per line, e.g. `  4 → 14 (ladder)`.
    pub fn describe(&self) -> String {
        self.transitions()
            .map(|t| format!("  {} → {} ({})", t.base, t.destination, t.kind))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for BoardTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_passes_validation() {
        let validated = BoardTable::new(STANDARD_TRANSITIONS).expect("standard table is valid");
        assert_eq!(validated, BoardTable::standard());
    }

    #[test]
    fn rejects_self_loop() {
        assert_eq!(BoardTable::new([(5, 5)]), Err(BoardError::SelfLoop(5)));
    }

    #[test]
    fn rejects_chain() {
        let err = BoardTable::new([(3, 10), (10, 2)]).unwrap_err();
        assert_eq!(err, BoardError::Chained { base: 3, destination: 10 });
    }

    #[test]
    fn rejects_out_of_range_and_winning_base() {
        assert_eq!(BoardTable::new([(0, 5)]), Err(BoardError::OutOfRange(0)));
        assert_eq!(BoardTable::new([(7, 101)]), Err(BoardError::OutOfRange(101)));
        assert_eq!(BoardTable::new([(100, 5)]), Err(BoardError::WinningBase));
    }
}
