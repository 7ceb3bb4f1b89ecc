//! Deterministic offline contestants.

use super::{Agent, AgentError};
use chutes_ladders::{Action, ActionKind, MatchView};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Play order for the game-advancing actions.
const RUNNER_ORDER: [ActionKind; 5] = [
    ActionKind::Spin,
    ActionKind::Move,
    ActionKind::Ascend,
    ActionKind::Descend,
    ActionKind::EndTurn,
];

/// Behavior of a [`ScriptedAgent`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScriptedStrategy {
    /// Spins, moves, takes every ladder and chute, ends the turn.
    Runner,
    /// Forfeits as soon as forfeit is on the menu.
    Forfeit,
    /// Sends one message per turn, then plays like a runner.
    Chatter,
    /// Only ever plans; never advances the game.
    Stall,
}

/// Contestant that follows a fixed strategy over the legal menu.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    name: String,
    strategy: ScriptedStrategy,
    last_chat_turn: Option<u32>,
}

impl ScriptedAgent {
    /// Creates a scripted agent.
    pub fn new(name: impl Into<String>, strategy: ScriptedStrategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            last_chat_turn: None,
        }
    }

    /// Shorthand for a [`ScriptedStrategy::Runner`].
    pub fn runner(name: impl Into<String>) -> Self {
        Self::new(name, ScriptedStrategy::Runner)
    }

    /// Shorthand for a [`ScriptedStrategy::Forfeit`].
    pub fn forfeiter(name: impl Into<String>) -> Self {
        Self::new(name, ScriptedStrategy::Forfeit)
    }

    /// The configured strategy.
    pub fn strategy(&self) -> ScriptedStrategy {
        self.strategy
    }

    fn run(view: &MatchView<'_>) -> Option<Action> {
        RUNNER_ORDER
            .iter()
            .find_map(|kind| view.menu.iter().find(|entry| entry.kind() == *kind))
            .cloned()
    }
}

#[async_trait::async_trait]
impl Agent for ScriptedAgent {
    #[instrument(skip(self, view), fields(agent = %self.name, strategy = %self.strategy, phase = %view.phase))]
    async fn choose(&mut self, view: &MatchView<'_>) -> Result<Action, AgentError> {
        let chosen = match self.strategy {
            ScriptedStrategy::Runner => Self::run(view),
            ScriptedStrategy::Forfeit => view
                .menu
                .contains(&Action::Forfeit)
                .then_some(Action::Forfeit)
                .or_else(|| Self::run(view)),
            ScriptedStrategy::Chatter if self.last_chat_turn != Some(view.turn) => {
                self.last_chat_turn = Some(view.turn);
                Some(Action::SendMessage {
                    message: format!("{} is on square {}.", self.name, view.positions.get(view.slot)),
                })
            }
            ScriptedStrategy::Chatter => Self::run(view),
            ScriptedStrategy::Stall => Some(Action::Plan {
                thought: "Still thinking.".to_string(),
            }),
        };

        let action = chosen.ok_or_else(|| AgentError::Malformed {
            reason: "no scripted action is on the menu".to_string(),
        })?;
        debug!(%action, "Scripted choice");
        Ok(action)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
