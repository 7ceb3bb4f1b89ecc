//! Per-match state machine.
//!
//! A [`Match`] owns pawn positions, the active seat, any pending draw offer
//! and the append-only transcript. Every agent request goes through
//! [`Match::apply`], which checks it against the current legal menu and
//! either executes it or ends the match as the mover's illegal-move loss.

use crate::action::{Action, ActionKind};
use crate::board::{BoardTable, Landing, ResolvedSquare, Transition, TransitionKind, WIN_SQUARE};
use crate::spinner::{ScriptedSpinner, SeededSpinner, Spinner};
use crate::types::{MatchStatus, Positions, Slot};
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where the active seat is within its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Phase {
    /// The turn has not started; the seat must spin.
    #[display("awaiting spin")]
    AwaitingSpin,
    /// The seat has spun and must move.
    #[display("awaiting movement")]
    AwaitingMove,
    /// The seat landed on a ladder foot or chute head and must take it.
    #[display("awaiting ladder or chute")]
    AwaitingTransition,
    /// The pawn has settled; the seat may end the turn.
    #[display("awaiting end of turn")]
    AwaitingEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    AwaitingSpin,
    AwaitingMove { landing: ResolvedSquare, target: u8 },
    AwaitingTransition { transition: Transition },
    AwaitingEnd,
}

impl TurnState {
    fn phase(&self) -> Phase {
        match self {
            TurnState::AwaitingSpin => Phase::AwaitingSpin,
            TurnState::AwaitingMove { .. } => Phase::AwaitingMove,
            TurnState::AwaitingTransition { .. } => Phase::AwaitingTransition,
            TurnState::AwaitingEnd => Phase::AwaitingEnd,
        }
    }

    fn allows_turn_options(&self) -> bool {
        matches!(self, TurnState::AwaitingSpin | TurnState::AwaitingEnd)
    }
}

/// Why an action was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, Error)]
pub enum IllegalAction {
    /// The action kind is not on the menu in this phase.
    #[display("{kind} is not available while {phase}")]
    Unavailable {
        /// Attempted kind.
        kind: ActionKind,
        /// Phase at the time.
        phase: Phase,
    },
    /// The kind is on the menu but names the wrong square.
    #[display("{kind} must target square {expected}, not {attempted}")]
    WrongSquare {
        /// Attempted kind.
        kind: ActionKind,
        /// Square the agent named.
        attempted: u8,
        /// The only legal square.
        expected: u8,
    },
    /// `accept_draw` without a pending offer from the opponent.
    #[display("no draw offer is pending")]
    NoDrawOffer,
    /// `offer_draw` while the seat's own offer is still pending.
    #[display("a draw offer from {_0} is already pending")]
    OfferPending(#[error(not(source))] Slot),
}

/// Outcome of validating one transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The action was legal and executed.
    Accepted {
        /// Feedback shown to the agent.
        note: String,
    },
    /// The action was outside the legal menu; the mover lost.
    Illegal {
        /// What was wrong.
        reason: IllegalAction,
    },
    /// The agent produced no usable action; the mover lost.
    AgentFailure {
        /// Timeout, provider error or malformed reply.
        reason: String,
    },
}

impl Verdict {
    /// True when the action was executed.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted { .. })
    }

    /// Text suitable for feeding back to an agent.
    pub fn message(&self) -> String {
        match self {
            Verdict::Accepted { note } => note.clone(),
            Verdict::Illegal { reason } => format!("Illegal move: {reason}"),
            Verdict::AgentFailure { reason } => format!("Agent failure: {reason}"),
        }
    }
}

/// One transcript entry: what was attempted and what it did to the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// One-based turn number; each seat's turn counts once.
    pub turn: u32,
    /// Seat that acted.
    pub slot: Slot,
    /// The request, or `None` when the agent failed to produce one.
    pub action: Option<Action>,
    /// Validation result.
    pub verdict: Verdict,
    /// Spinner value drawn by this action, if it was a spin.
    pub spin: Option<u8>,
    /// Board before the action.
    pub before: Positions,
    /// Board after the action.
    pub after: Positions,
}

/// Error returned when driving a match that has already ended.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum MatchError {
    /// The match is terminal and immutable.
    #[display("match is already over: {_0}")]
    Finished(#[error(not(source))] MatchStatus),
}

/// Error replaying a stored transcript.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum ReplayError {
    /// A failure-free entry had no action.
    #[display("entry {index} has no action and is not an agent failure")]
    MissingAction {
        /// Position in the transcript.
        index: usize,
    },
    /// The match refused the entry.
    #[display("entry {index} could not be applied: {source}")]
    Rejected {
        /// Position in the transcript.
        index: usize,
        /// Underlying error.
        source: MatchError,
    },
    /// Re-execution produced a different entry.
    #[display("entry {index} diverges from the recorded transcript")]
    Diverged {
        /// Position in the transcript.
        index: usize,
    },
}

/// Everything an agent is allowed to see when choosing an action.
#[derive(Debug, Clone)]
pub struct MatchView<'a> {
    /// Seat being asked.
    pub slot: Slot,
    /// Current turn number.
    pub turn: u32,
    /// Pawn squares.
    pub positions: Positions,
    /// Phase within the turn.
    pub phase: Phase,
    /// Value drawn this turn, if any.
    pub spin: Option<u8>,
    /// True when the opponent's draw offer awaits this seat.
    pub draw_offered_to_me: bool,
    /// Legal actions, in menu order.
    pub menu: Vec<Action>,
    /// Public transcript so far.
    pub history: &'a [TurnRecord],
    /// Board geometry.
    pub table: &'a BoardTable,
}

/// One match between seats A and B.
#[derive(Debug, Clone)]
pub struct Match<S = SeededSpinner> {
    table: Arc<BoardTable>,
    spinner: S,
    positions: Positions,
    active: Slot,
    turn_state: TurnState,
    spin: Option<u8>,
    pending_draw_offer: Option<Slot>,
    status: MatchStatus,
    completed_turns: u32,
    log: Vec<TurnRecord>,
}

impl<S: Spinner> Match<S> {
    /// Starts a match with both pawns off the board and seat A to act.
    #[instrument(skip(table, spinner))]
    pub fn new(table: Arc<BoardTable>, spinner: S) -> Self {
        Self::with_positions(table, spinner, Positions::default())
    }

    /// Starts a match from arbitrary pawn squares with seat A to act.
    #[instrument(skip(table, spinner))]
    pub fn with_positions(table: Arc<BoardTable>, spinner: S, positions: Positions) -> Self {
        debug!(%positions, "Starting match");
        Self {
            table,
            spinner,
            positions,
            active: Slot::A,
            turn_state: TurnState::AwaitingSpin,
            spin: None,
            pending_draw_offer: None,
            status: MatchStatus::InProgress,
            completed_turns: 0,
            log: Vec::new(),
        }
    }

    /// Board geometry.
    pub fn table(&self) -> &BoardTable {
        &self.table
    }

    /// Current pawn squares.
    pub fn positions(&self) -> Positions {
        self.positions
    }

    /// Seat that must act next.
    pub fn active(&self) -> Slot {
        self.active
    }

    /// Match status.
    pub fn status(&self) -> MatchStatus {
        self.status
    }

    /// Seat whose draw offer is pending, if any.
    pub fn pending_draw_offer(&self) -> Option<Slot> {
        self.pending_draw_offer
    }

    /// Phase within the active seat's turn.
    pub fn phase(&self) -> Phase {
        self.turn_state.phase()
    }

    /// Value drawn during the current turn.
    pub fn spin(&self) -> Option<u8> {
        self.spin
    }

    /// Append-only transcript.
    pub fn log(&self) -> &[TurnRecord] {
        &self.log
    }

    /// One-based number of the turn being played.
    pub fn turn_number(&self) -> u32 {
        self.completed_turns + 1
    }

    /// Turns that were ended with `end_turn`.
    pub fn completed_turns(&self) -> u32 {
        self.completed_turns
    }

    /// Turns played, counting the turn in which a terminal action happened.
    pub fn turns_played(&self) -> u32 {
        match self.status {
            MatchStatus::InProgress | MatchStatus::TurnLimit => self.completed_turns,
            _ => self.completed_turns + 1,
        }
    }

    /// Legal actions for the active seat, in a stable order.
    ///
    /// Square-carrying entries name the only legal square. Chat entries are
    /// templates; any text is accepted. Empty once the match is over.
    pub fn menu(&self) -> Vec<Action> {
        if self.status.is_terminal() {
            return Vec::new();
        }

        let mut menu = Vec::new();
        match self.turn_state {
            TurnState::AwaitingSpin => menu.push(Action::Spin),
            TurnState::AwaitingMove { target, .. } => menu.push(Action::Move { square: target }),
            TurnState::AwaitingTransition { transition } => menu.push(match transition.kind {
                TransitionKind::Ladder => Action::Ascend {
                    square: transition.destination,
                },
                TransitionKind::Chute => Action::Descend {
                    square: transition.destination,
                },
            }),
            TurnState::AwaitingEnd => menu.push(Action::EndTurn),
        }

        if self.turn_state.allows_turn_options() {
            if self.pending_draw_offer == Some(self.active.opponent()) {
                menu.push(Action::AcceptDraw);
            }
            if self.pending_draw_offer != Some(self.active) {
                menu.push(Action::OfferDraw);
            }
            menu.push(Action::Forfeit);
        }

        menu.push(Action::SendMessage {
            message: String::new(),
        });
        menu.push(Action::Plan {
            thought: String::new(),
        });
        menu
    }

    /// Checks `action` against the menu without changing anything.
    ///
    /// # Errors
    ///
    /// Returns the [`IllegalAction`] that `apply` would record.
    pub fn check(&self, action: &Action) -> Result<(), IllegalAction> {
        let kind = action.kind();
        let menu = self.menu();

        if let Some(entry) = menu.iter().find(|entry| entry.kind() == kind) {
            return if action.fills(entry) {
                Ok(())
            } else {
                Err(IllegalAction::WrongSquare {
                    kind,
                    attempted: action.square().unwrap_or_default(),
                    expected: entry.square().unwrap_or_default(),
                })
            };
        }

        let phase = self.phase();
        Err(match kind {
            ActionKind::AcceptDraw if self.turn_state.allows_turn_options() => {
                IllegalAction::NoDrawOffer
            }
            ActionKind::OfferDraw if self.turn_state.allows_turn_options() => {
                IllegalAction::OfferPending(self.active)
            }
            _ => IllegalAction::Unavailable { kind, phase },
        })
    }

    /// Validates and applies one action for the active seat.
    ///
    /// Illegal actions are not errors: they are recorded with an
    /// [`Verdict::Illegal`] verdict and end the match as the mover's loss.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Finished`] if the match is already over.
    #[instrument(skip(self), fields(slot = %self.active, turn = self.turn_number()))]
    pub fn apply(&mut self, action: Action) -> Result<TurnRecord, MatchError> {
        self.ensure_in_progress()?;

        let slot = self.active;
        let turn = self.turn_number();
        let before = self.positions;

        let (verdict, spin) = match self.check(&action) {
            Err(reason) => {
                warn!(%action, %reason, "Illegal action ends the match");
                self.status = MatchStatus::IllegalMove(slot);
                (Verdict::Illegal { reason }, None)
            }
            Ok(()) => {
                if self.pending_draw_offer == Some(slot.opponent()) && action != Action::AcceptDraw
                {
                    debug!("Pending draw offer declined by taking another action");
                    self.pending_draw_offer = None;
                }
                let (note, spin) = self.execute(&action);
                (Verdict::Accepted { note }, spin)
            }
        };

        let record = TurnRecord {
            turn,
            slot,
            action: Some(action),
            verdict,
            spin,
            before,
            after: self.positions,
        };
        debug!(status = %self.status, after = %record.after, "Action recorded");
        self.log.push(record.clone());
        Ok(record)
    }

    /// Ends the match as the active seat's loss because its agent produced
    /// no usable action.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Finished`] if the match is already over.
    #[instrument(skip(self, reason), fields(slot = %self.active))]
    pub fn record_agent_failure(&mut self, reason: impl Into<String>) -> Result<TurnRecord, MatchError> {
        self.ensure_in_progress()?;

        let reason = reason.into();
        let slot = self.active;
        warn!(%reason, "Agent failure ends the match");
        self.status = MatchStatus::IllegalMove(slot);

        let record = TurnRecord {
            turn: self.turn_number(),
            slot,
            action: None,
            verdict: Verdict::AgentFailure { reason },
            spin: None,
            before: self.positions,
            after: self.positions,
        };
        self.log.push(record.clone());
        Ok(record)
    }

    /// Stops the match at the caller's turn cap.
    ///
    /// # Errors
    ///
    /// Returns [`MatchError::Finished`] if the match is already over.
    #[instrument(skip(self))]
    pub fn halt_on_turn_limit(&mut self) -> Result<(), MatchError> {
        self.ensure_in_progress()?;
        info!(turns = self.completed_turns, "Match halted at turn limit");
        self.status = MatchStatus::TurnLimit;
        Ok(())
    }

    /// Snapshot of what the active seat may see.
    pub fn view(&self) -> MatchView<'_> {
        MatchView {
            slot: self.active,
            turn: self.turn_number(),
            positions: self.positions,
            phase: self.phase(),
            spin: self.spin,
            draw_offered_to_me: self.pending_draw_offer == Some(self.active.opponent()),
            menu: self.menu(),
            history: &self.log,
            table: &self.table,
        }
    }

    fn ensure_in_progress(&self) -> Result<(), MatchError> {
        if self.status.is_terminal() {
            return Err(MatchError::Finished(self.status));
        }
        Ok(())
    }

    /// Where the turn goes after the pawn comes to rest on `square`.
    fn settle_on(&self, square: u8) -> TurnState {
        match self.table.transition(square) {
            Some(transition) => TurnState::AwaitingTransition { transition },
            None => TurnState::AwaitingEnd,
        }
    }

    fn transition_note(&self, square: u8) -> &'static str {
        match self.table.transition(square).map(|t| t.kind) {
            Some(TransitionKind::Ladder) => " There's a ladder here!",
            Some(TransitionKind::Chute) => " There's a chute here!",
            None => "",
        }
    }

    /// Executes an action that already passed `check`.
    fn execute(&mut self, action: &Action) -> (String, Option<u8>) {
        let slot = self.active;
        match (action, self.turn_state) {
            (Action::Spin, _) => {
                let value = self.spinner.spin();
                self.spin = Some(value);
                let current = self.positions.get(slot);
                if current == 0 {
                    // First spin places the pawn directly on the drawn square.
                    self.positions.set(slot, value);
                    self.turn_state = self.settle_on(value);
                    let note = format!(
                        "You spun a {value} and entered the board on square {value}.{}",
                        self.transition_note(value)
                    );
                    (note, Some(value))
                } else {
                    let landing = self.table.resolve(current, value);
                    let target = landing.landing_square().unwrap_or(current);
                    self.turn_state = TurnState::AwaitingMove { landing, target };
                    (format!("You spun a {value}."), Some(value))
                }
            }
            (Action::Move { square }, TurnState::AwaitingMove { landing, .. }) => {
                let square = *square;
                self.positions.set(slot, square);
                let note = match landing.landing() {
                    Landing::Overshoot => {
                        self.turn_state = TurnState::AwaitingEnd;
                        format!("Spin overshoots {WIN_SQUARE}. You stay on {square}.")
                    }
                    Landing::Win => {
                        info!(%slot, "Pawn reached the winning square");
                        self.status = MatchStatus::Won(slot);
                        format!("Moved to {square}. You win!")
                    }
                    Landing::Plain | Landing::Ladder { .. } | Landing::Chute { .. } => {
                        self.turn_state = self.settle_on(square);
                        format!("Moved to {square}.{}", self.transition_note(square))
                    }
                };
                (note, None)
            }
            (Action::Ascend { square } | Action::Descend { square }, _) => {
                let square = *square;
                self.positions.set(slot, square);
                let verb = if action.kind() == ActionKind::Ascend {
                    "Climbed ladder"
                } else {
                    "Slid down chute"
                };
                if square == WIN_SQUARE {
                    info!(%slot, "Ladder reached the winning square");
                    self.status = MatchStatus::Won(slot);
                    (format!("{verb} to {square}. You win!"), None)
                } else {
                    self.turn_state = TurnState::AwaitingEnd;
                    (format!("{verb} to {square}."), None)
                }
            }
            (Action::EndTurn, _) => {
                self.completed_turns += 1;
                self.active = slot.opponent();
                self.turn_state = TurnState::AwaitingSpin;
                self.spin = None;
                ("Turn over.".to_string(), None)
            }
            (Action::SendMessage { message }, _) => (format!("Message sent: {message}"), None),
            (Action::Plan { .. }, _) => ("Plan noted.".to_string(), None),
            (Action::OfferDraw, _) => {
                self.pending_draw_offer = Some(slot);
                ("Draw offered.".to_string(), None)
            }
            (Action::AcceptDraw, _) => {
                self.pending_draw_offer = None;
                self.status = MatchStatus::Draw;
                ("Draw accepted.".to_string(), None)
            }
            (Action::Forfeit, _) => {
                self.status = MatchStatus::Forfeit(slot);
                ("Player forfeits.".to_string(), None)
            }
            (Action::Move { .. }, _) => {
                unreachable!("move_pawn_to_square is only on the menu while awaiting movement")
            }
        }
    }
}

impl Match<ScriptedSpinner> {
    /// Re-executes a transcript using its recorded spins.
    ///
    /// The match starts from the first entry's `before` snapshot with seat A
    /// to act. Every re-executed entry must equal the stored one.
    ///
    /// # Errors
    ///
    /// Returns [`ReplayError`] at the first entry that cannot be applied or
    /// that produces a different record.
    #[instrument(skip(table, log), fields(entries = log.len()))]
    pub fn replay(table: Arc<BoardTable>, log: &[TurnRecord]) -> Result<Self, ReplayError> {
        let spins: Vec<u8> = log.iter().filter_map(|record| record.spin).collect();
        let start = log.first().map(|record| record.before).unwrap_or_default();
        let mut game = Match::with_positions(table, ScriptedSpinner::new(spins), start);

        for (index, expected) in log.iter().enumerate() {
            let actual = match (&expected.action, &expected.verdict) {
                (Some(action), _) => game.apply(action.clone()),
                (None, Verdict::AgentFailure { reason }) => game.record_agent_failure(reason.clone()),
                (None, _) => return Err(ReplayError::MissingAction { index }),
            }
            .map_err(|source| ReplayError::Rejected { index, source })?;

            if actual != *expected {
                warn!(index, "Replay diverged");
                return Err(ReplayError::Diverged { index });
            }
        }

        info!(status = %game.status, "Transcript replayed");
        Ok(game)
    }
}
