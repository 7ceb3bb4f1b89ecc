//! Contestant backed by a language model.

use super::tools::{action_from_tool_call, action_tools};
use super::{Agent, AgentError};
use crate::llm_client::{LlmClient, LlmInvocation, ToolSpec};
use chutes_ladders::{Action, MatchView, TurnRecord};
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Transcript entries shown to the model each request.
const HISTORY_WINDOW: usize = 12;

const RULES: &str = "You are playing Chutes & Ladders against another agent.

Rules:
- Squares run from 1 to 100. Both pawns start off the board.
- Every turn starts with spin_spinner, which draws a value from 1 to 6.
- On your first spin the pawn is placed directly on the spun square.
- On later spins, move_pawn_to_square to your current square plus the spin. If that would pass 100, pass your current square instead; the pawn stays put.
- If the pawn rests on the foot of a ladder or the head of a chute you must take it at once with ascend_ladder_to_square or descend_chute_to_square.
- Then call end_turn.
- Landing exactly on 100 wins. A ladder that tops out at 100 also wins.
- send_message and plan are free and never use up your turn.
- At the start or end of your turn you may offer_draw or forfeit. If your opponent offered a draw you may accept_draw; any other action declines it.
- Any action that is not on your menu, or that names the wrong square, loses the match immediately.";

/// Contestant that asks an LLM for each action through tool calls.
#[derive(Debug, Clone)]
pub struct LlmAgent {
    name: String,
    client: LlmClient,
    tools: Vec<ToolSpec>,
    system_prompt: Option<String>,
    invocations: Vec<LlmInvocation>,
}

impl LlmAgent {
    /// Creates an agent around a configured client.
    pub fn new(name: impl Into<String>, client: LlmClient) -> Self {
        Self {
            name: name.into(),
            client,
            tools: action_tools(),
            system_prompt: None,
            invocations: Vec::new(),
        }
    }

    /// Rules and board table. Built once per match.
    fn system_prompt(&mut self, view: &MatchView<'_>) -> &str {
        self.system_prompt.get_or_insert_with(|| {
            format!(
                "{RULES}\n\nLadders and chutes on this board:\n{}\n\n\
                 Act by calling exactly one of the provided tools per reply. \
                 Only the actions listed under \"Available actions\" are legal right now.",
                view.table.describe()
            )
        })
    }
}

/// Renders the seat's view as the user message.
pub(crate) fn render_view(view: &MatchView<'_>) -> String {
    let mut out = String::new();
    let mine = view.positions.get(view.slot);
    let theirs = view.positions.get(view.slot.opponent());

    let _ = writeln!(out, "Turn {}. You are player {}.", view.turn, view.slot);
    let _ = writeln!(out, "Your square: {mine}. Opponent's square: {theirs}.");
    if let Some(spin) = view.spin {
        let _ = writeln!(out, "You spun a {spin} this turn.");
    }
    if view.draw_offered_to_me {
        let _ = writeln!(out, "Your opponent has offered a draw.");
    }

    let start = view.history.len().saturating_sub(HISTORY_WINDOW);
    if start < view.history.len() {
        let _ = writeln!(out, "\nRecent history:");
        for record in &view.history[start..] {
            let _ = writeln!(out, "  {}", render_record(record));
        }
    }

    let _ = writeln!(out, "\nAvailable actions:");
    for entry in &view.menu {
        let kind = entry.kind();
        let _ = writeln!(out, "- {}: {}", kind, kind.description());
    }
    out
}

fn render_record(record: &TurnRecord) -> String {
    let action = record
        .action
        .as_ref()
        .map_or_else(|| "(no action)".to_string(), ToString::to_string);
    format!(
        "turn {} {}: {} -> {}",
        record.turn,
        record.slot,
        action,
        record.verdict.message()
    )
}

/// Parses the first JSON object in `reply` as an [`Action`].
///
/// Used when a model answers in prose instead of calling a tool.
///
/// # Errors
///
/// Returns [`AgentError::Malformed`] if no object starts in the reply, the
/// object is cut off, or it is not a valid action.
pub fn extract_action(reply: &str) -> Result<Action, AgentError> {
    let start = reply.find('{').ok_or_else(|| AgentError::Malformed {
        reason: "reply contains no JSON object".to_string(),
    })?;

    serde_json::Deserializer::from_str(&reply[start..])
        .into_iter::<Action>()
        .next()
        .unwrap_or_else(|| Err(serde::de::Error::custom("empty reply")))
        .map_err(|e| AgentError::Malformed {
            reason: format!("{}: {}", e, &reply[start..]),
        })
}

#[async_trait::async_trait]
impl Agent for LlmAgent {
    #[instrument(skip(self, view), fields(agent = %self.name, turn = view.turn, slot = %view.slot))]
    async fn choose(&mut self, view: &MatchView<'_>) -> Result<Action, AgentError> {
        let user_message = render_view(view);
        let system_prompt = self.system_prompt(view).to_string();
        let provider = self.client.config().provider();

        let started = Instant::now();
        let completion = match self
            .client
            .generate(&system_prompt, &user_message, &self.tools)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                self.invocations.push(LlmInvocation::failed(
                    provider,
                    self.client.config().model(),
                    self.client.request_body(&system_prompt, &user_message, &self.tools),
                    started.elapsed(),
                    &e,
                ));
                return Err(e.into());
            }
        };
        self.invocations
            .push(LlmInvocation::from_completion(provider, &completion));

        let action = match (completion.tool_call(), completion.text()) {
            (Some(call), _) => action_from_tool_call(call),
            (None, Some(text)) => {
                debug!("Model answered in prose");
                extract_action(text)
            }
            (None, None) => Err(AgentError::Malformed {
                reason: "reply has neither a tool call nor text".to_string(),
            }),
        };
        action.inspect_err(|e| warn!(error = %e, "Unusable model reply"))
    }

    fn drain_invocations(&mut self) -> Vec<LlmInvocation> {
        std::mem::take(&mut self.invocations)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
