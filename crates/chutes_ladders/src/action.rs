//! First-class action types.
//!
//! Actions are domain events, not side effects. They are the closed set of
//! things an agent may ask for, and they can be validated against the
//! current legal menu before anything changes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Data-less tag for each [`Action`] variant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum ActionKind {
    /// Draw a spinner value.
    #[serde(rename = "spin_spinner")]
    #[strum(serialize = "spin_spinner")]
    Spin,
    /// Move the pawn by the drawn value.
    #[serde(rename = "move_pawn_to_square")]
    #[strum(serialize = "move_pawn_to_square")]
    Move,
    /// Climb a ladder.
    #[serde(rename = "ascend_ladder_to_square")]
    #[strum(serialize = "ascend_ladder_to_square")]
    Ascend,
    /// Slide down a chute.
    #[serde(rename = "descend_chute_to_square")]
    #[strum(serialize = "descend_chute_to_square")]
    Descend,
    /// Hand the turn to the opponent.
    #[serde(rename = "end_turn")]
    #[strum(serialize = "end_turn")]
    EndTurn,
    /// Chat with the opponent.
    #[serde(rename = "send_message")]
    #[strum(serialize = "send_message")]
    SendMessage,
    /// Think out loud.
    #[serde(rename = "plan")]
    #[strum(serialize = "plan")]
    Plan,
    /// Propose a draw.
    #[serde(rename = "offer_draw")]
    #[strum(serialize = "offer_draw")]
    OfferDraw,
    /// Accept the opponent's pending draw offer.
    #[serde(rename = "accept_draw")]
    #[strum(serialize = "accept_draw")]
    AcceptDraw,
    /// Concede the match.
    #[serde(rename = "forfeit")]
    #[strum(serialize = "forfeit")]
    Forfeit,
}

impl ActionKind {
    /// True for actions that never change the board or the turn.
    pub fn is_chat(self) -> bool {
        matches!(self, ActionKind::SendMessage | ActionKind::Plan)
    }

    /// True for actions whose legality depends on the target square.
    pub fn takes_square(self) -> bool {
        matches!(
            self,
            ActionKind::Move | ActionKind::Ascend | ActionKind::Descend
        )
    }

    /// One-line description shown to agents.
    pub fn description(self) -> &'static str {
        match self {
            ActionKind::Spin => "Spin the spinner (1-6). Must be the first thing you do each turn.",
            ActionKind::Move => {
                "Move your pawn to your current square plus the spin. If that passes 100, pass your current square to stay put."
            }
            ActionKind::Ascend => "Climb the ladder you landed on; pass the square at its top.",
            ActionKind::Descend => "Slide down the chute you landed on; pass the square at its bottom.",
            ActionKind::EndTurn => "End your turn.",
            ActionKind::SendMessage => "Send a chat message to your opponent. Does not use up your turn.",
            ActionKind::Plan => "Write down your reasoning. No effect on the game.",
            ActionKind::OfferDraw => "Offer your opponent a draw.",
            ActionKind::AcceptDraw => "Accept the draw your opponent offered.",
            ActionKind::Forfeit => "Concede the match (automatic loss).",
        }
    }
}

/// A single request from an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "action")]
pub enum Action {
    /// Draw a spinner value. On an unstarted pawn this also places it.
    #[serde(rename = "spin_spinner")]
    Spin,
    /// Move to `square`, which must be current square plus spin.
    #[serde(rename = "move_pawn_to_square")]
    Move {
        /// Target square.
        square: u8,
    },
    /// Climb from the ladder foot to `square`.
    #[serde(rename = "ascend_ladder_to_square")]
    Ascend {
        /// Top of the ladder.
        square: u8,
    },
    /// Slide from the chute head to `square`.
    #[serde(rename = "descend_chute_to_square")]
    Descend {
        /// Bottom of the chute.
        square: u8,
    },
    /// End the turn.
    #[serde(rename = "end_turn")]
    EndTurn,
    /// Chat with the opponent.
    #[serde(rename = "send_message")]
    SendMessage {
        /// Message text.
        #[serde(default)]
        message: String,
    },
    /// Think out loud.
    #[serde(rename = "plan")]
    Plan {
        /// Reasoning text.
        #[serde(default)]
        thought: String,
    },
    /// Propose a draw.
    #[serde(rename = "offer_draw")]
    OfferDraw,
    /// Accept a pending draw offer.
    #[serde(rename = "accept_draw")]
    AcceptDraw,
    /// Concede.
    #[serde(rename = "forfeit")]
    Forfeit,
}

impl Action {
    /// Returns the variant tag.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Spin => ActionKind::Spin,
            Action::Move { .. } => ActionKind::Move,
            Action::Ascend { .. } => ActionKind::Ascend,
            Action::Descend { .. } => ActionKind::Descend,
            Action::EndTurn => ActionKind::EndTurn,
            Action::SendMessage { .. } => ActionKind::SendMessage,
            Action::Plan { .. } => ActionKind::Plan,
            Action::OfferDraw => ActionKind::OfferDraw,
            Action::AcceptDraw => ActionKind::AcceptDraw,
            Action::Forfeit => ActionKind::Forfeit,
        }
    }

    /// Target square for square-carrying actions.
    pub fn square(&self) -> Option<u8> {
        match self {
            Action::Move { square } | Action::Ascend { square } | Action::Descend { square } => {
                Some(*square)
            }
            _ => None,
        }
    }

    /// Whether `self` is an instance of the menu entry `template`.
    ///
    /// Square-carrying actions must name the same square; chat actions
    /// match on kind alone because their text is free.
    pub fn fills(&self, template: &Action) -> bool {
        self.kind() == template.kind() && (!self.kind().takes_square() || self.square() == template.square())
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Move { square } | Action::Ascend { square } | Action::Descend { square } => {
                write!(f, "{}({})", self.kind(), square)
            }
            Action::SendMessage { message } => write!(f, "{}({:?})", self.kind(), message),
            Action::Plan { thought } => write!(f, "{}({:?})", self.kind(), thought),
            _ => write!(f, "{}", self.kind()),
        }
    }
}
