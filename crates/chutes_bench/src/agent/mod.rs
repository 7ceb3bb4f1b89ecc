//! Agent trait and implementations.

mod llm;
mod scripted;
mod tools;

pub use llm::{LlmAgent, extract_action};
pub use scripted::{ScriptedAgent, ScriptedStrategy};
pub use tools::{action_from_tool_call, action_tools};

use chutes_ladders::{Action, MatchView};
use derive_more::{Display, Error, From};

use crate::llm_client::{LlmError, LlmInvocation};

/// Trait for contestants that choose actions.
#[async_trait::async_trait]
pub trait Agent: Send {
    /// Picks one action for the seat described by `view`.
    ///
    /// The returned action is validated by the match; an action outside
    /// `view.menu` loses the match for this seat.
    async fn choose(&mut self, view: &MatchView<'_>) -> Result<Action, AgentError>;

    /// Returns the contestant's display name.
    fn name(&self) -> &str;

    /// Takes the model calls made since the last drain, oldest first.
    ///
    /// Agents that do not call a model keep the default.
    fn drain_invocations(&mut self) -> Vec<LlmInvocation> {
        Vec::new()
    }
}

/// Builds fresh agents, one per seat per match.
pub trait AgentFactory: Send + Sync {
    /// Creates an agent for the named contestant.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Setup`] if the contestant is unknown or cannot
    /// be configured.
    fn build(&self, contestant: &str) -> Result<Box<dyn Agent>, AgentError>;
}

/// Why an agent produced no usable action.
#[derive(Debug, Clone, Display, Error, From)]
pub enum AgentError {
    /// The model provider failed.
    #[display("provider error: {_0}")]
    Provider(LlmError),
    /// The reply did not contain a parseable action.
    #[display("malformed reply: {reason}")]
    #[from(ignore)]
    Malformed {
        /// What was wrong with the reply.
        reason: String,
    },
    /// The agent could not be constructed.
    #[display("cannot build agent: {_0}")]
    #[from(ignore)]
    Setup(#[error(not(source))] String),
}
