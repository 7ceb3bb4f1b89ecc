//! Benchmark configuration loaded from TOML.

use crate::agent::{Agent, AgentError, AgentFactory, LlmAgent, ScriptedAgent, ScriptedStrategy};
use crate::llm_client::{LlmClient, LlmConfig, LlmProvider};
use crate::scheduler::RunSettings;
use chutes_ladders::BoardTable;
use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// How a contestant picks its actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContestantKind {
    /// Backed by a language model.
    Llm {
        /// Model provider.
        #[serde(default = "default_provider")]
        provider: LlmProvider,
        /// Model name.
        model: String,
        /// Maximum tokens per reply.
        #[serde(default = "default_max_tokens")]
        max_tokens: u32,
    },
    /// Deterministic offline strategy.
    Scripted {
        /// Strategy preset.
        strategy: ScriptedStrategy,
    },
}

/// One named contestant.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct ContestantConfig {
    /// Unique contestant name, used in pairings and records.
    name: String,
    /// Contestant behavior.
    #[serde(flatten)]
    kind: ContestantKind,
}

impl ContestantConfig {
    /// Creates a contestant entry.
    pub fn new(name: impl Into<String>, kind: ContestantKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates LLM configuration for this contestant.
    /// Requires the provider's API key environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the contestant is not an LLM or the key is
    /// missing.
    #[instrument(skip(self), fields(contestant = %self.name))]
    pub fn create_llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let ContestantKind::Llm {
            provider,
            model,
            max_tokens,
        } = &self.kind
        else {
            return Err(ConfigError::new(format!("{} is not an LLM contestant", self.name)));
        };

        let var = provider.api_key_var();
        let api_key = std::env::var(var)
            .map_err(|_| ConfigError::new(format!("{} environment variable not set", var)))?;

        debug!(provider = %provider, model = %model, "Creating LLM config");
        Ok(LlmConfig::new(*provider, api_key, model.clone(), *max_tokens))
    }

    /// Builds a fresh agent for this contestant.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an LLM contestant cannot be configured.
    pub fn build_agent(&self) -> Result<Box<dyn Agent>, ConfigError> {
        let agent: Box<dyn Agent> = match &self.kind {
            ContestantKind::Scripted { strategy } => Box::new(ScriptedAgent::new(&self.name, *strategy)),
            ContestantKind::Llm { .. } => {
                let client = LlmClient::new(self.create_llm_config()?);
                Box::new(LlmAgent::new(&self.name, client))
            }
        };
        Ok(agent)
    }
}

fn default_provider() -> LlmProvider {
    LlmProvider::OpenAI
}

fn default_max_tokens() -> u32 {
    300
}

fn default_db_path() -> String {
    "chutes_bench.db".to_string()
}

fn default_trials() -> u32 {
    1
}

fn default_max_turns() -> u32 {
    200
}

fn default_max_actions_per_turn() -> u32 {
    20
}

fn default_agent_timeout_secs() -> u64 {
    60
}

fn default_claim_ttl_secs() -> u64 {
    15 * 60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_workers() -> usize {
    1
}

/// Whole benchmark configuration.
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct BenchConfig {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    db_path: String,

    /// Matches per ordered pair of contestants.
    #[serde(default = "default_trials")]
    trials: u32,

    /// Completed turns before a match is stopped.
    #[serde(default = "default_max_turns")]
    max_turns: u32,

    /// Actions one seat may take in a single turn.
    #[serde(default = "default_max_actions_per_turn")]
    max_actions_per_turn: u32,

    /// Seconds to wait for each agent reply.
    #[serde(default = "default_agent_timeout_secs")]
    agent_timeout_secs: u64,

    /// Seconds after which an idle claim counts as abandoned.
    #[serde(default = "default_claim_ttl_secs")]
    claim_ttl_secs: u64,

    /// Claims per pairing before it is left failed.
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,

    /// Concurrent workers.
    #[serde(default = "default_workers")]
    workers: usize,

    /// Base spinner seed.
    #[serde(default)]
    seed: u64,

    /// Ladder and chute override as `[base, destination]` pairs.
    #[serde(default)]
    board: Option<Vec<(u8, u8)>>,

    /// Contestants, in enumeration order.
    contestants: Vec<ContestantConfig>,
}

impl BenchConfig {
    /// Loads and validates configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, does not parse,
    /// or fails validation.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        debug!("Loading config from file");
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::new(format!("Failed to read config file: {}", e)))?;
        let config = Self::from_toml(&content)?;
        info!(contestants = config.contestants.len(), db_path = %config.db_path, "Config loaded successfully");
        Ok(config)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the text does not parse or fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ConfigError::new(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for contestant in &self.contestants {
            if contestant.name.trim().is_empty() {
                return Err(ConfigError::new("Contestant names must not be empty".to_string()));
            }
            if !seen.insert(contestant.name.as_str()) {
                return Err(ConfigError::new(format!("Duplicate contestant '{}'", contestant.name)));
            }
        }
        if self.contestants.len() < 2 {
            return Err(ConfigError::new("At least two contestants are required".to_string()));
        }
        if self.max_turns == 0 || self.max_actions_per_turn == 0 || self.max_attempts == 0 {
            return Err(ConfigError::new(
                "max_turns, max_actions_per_turn and max_attempts must be positive".to_string(),
            ));
        }
        if self.agent_timeout_secs == 0 {
            return Err(ConfigError::new("agent_timeout_secs must be positive".to_string()));
        }
        if self.claim_ttl_secs <= self.agent_timeout_secs {
            return Err(ConfigError::new(format!(
                "claim_ttl_secs ({}) must exceed agent_timeout_secs ({}) or live claims are taken over",
                self.claim_ttl_secs, self.agent_timeout_secs
            )));
        }
        self.board_table()?;
        Ok(())
    }

    /// Overrides the database path.
    pub fn set_db_path(&mut self, db_path: impl Into<String>) {
        self.db_path = db_path.into();
    }

    /// Keeps only the named contestants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a name is unknown or fewer than two remain.
    #[instrument(skip(self))]
    pub fn retain_contestants(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.contestants.iter().any(|c| &c.name == *name))
        {
            return Err(ConfigError::new(format!("Unknown contestant '{}'", unknown)));
        }
        self.contestants.retain(|c| names.contains(&c.name));
        if self.contestants.len() < 2 {
            return Err(ConfigError::new("At least two contestants are required".to_string()));
        }
        Ok(())
    }

    /// Contestant names in enumeration order.
    pub fn contestant_names(&self) -> Vec<String> {
        self.contestants.iter().map(|c| c.name.clone()).collect()
    }

    /// The configured board, or the standard one.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the override table is invalid.
    pub fn board_table(&self) -> Result<BoardTable, ConfigError> {
        match &self.board {
            Some(pairs) => BoardTable::new(pairs.iter().copied())
                .map_err(|e| ConfigError::new(format!("Invalid board: {}", e))),
            None => Ok(BoardTable::standard()),
        }
    }

    /// Scheduler settings.
    pub fn run_settings(&self) -> RunSettings {
        RunSettings::default()
            .with_trials(self.trials)
            .with_max_turns(self.max_turns)
            .with_max_actions_per_turn(self.max_actions_per_turn)
            .with_agent_timeout(Duration::from_secs(self.agent_timeout_secs))
            .with_claim_liveness(Duration::from_secs(self.claim_ttl_secs))
            .with_max_attempts(self.max_attempts)
            .with_workers(self.workers)
            .with_seed(self.seed)
    }

    /// Agent factory over the configured contestants.
    pub fn roster(&self) -> Roster {
        Roster::new(self.contestants.iter().cloned())
    }
}

/// Builds agents for configured contestants.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    contestants: BTreeMap<String, ContestantConfig>,
}

impl Roster {
    /// Creates a roster.
    pub fn new(contestants: impl IntoIterator<Item = ContestantConfig>) -> Self {
        Self {
            contestants: contestants
                .into_iter()
                .map(|c| (c.name.clone(), c))
                .collect(),
        }
    }
}

impl AgentFactory for Roster {
    #[instrument(skip(self))]
    fn build(&self, contestant: &str) -> Result<Box<dyn Agent>, AgentError> {
        let config = self
            .contestants
            .get(contestant)
            .ok_or_else(|| AgentError::Setup(format!("unknown contestant '{}'", contestant)))?;
        config.build_agent().map_err(|e| AgentError::Setup(e.message))
    }
}

/// Configuration error.
#[derive(Debug, Clone, Display, Error)]
#[display("Config error: {} at {}:{}", message, file, line)]
pub struct ConfigError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ConfigError {
    /// Creates a new configuration error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: String) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}
