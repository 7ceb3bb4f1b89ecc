//! Chutes Bench library - resumable agent-vs-agent Chutes & Ladders runs
//!
//! Pits configured contestants against each other in every ordered pairing,
//! records every action durably, and resumes an interrupted run without
//! replaying or double-counting completed matches.
//!
//! # Architecture
//!
//! - **Store**: SQLite pairing queue, claim audit trail, transcripts and match records
//! - **Scheduler**: pool of workers that claim, play and commit pairings
//! - **Agents**: scripted contestants and LLM-backed contestants (OpenAI, Anthropic, OpenRouter)
//! - **Config**: TOML run description
//!
//! # Example
//!
//! ```no_run
//! use chutes_bench::{BenchConfig, MatchStore, Scheduler, Shutdown};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = BenchConfig::from_file("bench.toml")?;
//! let store = MatchStore::open(config.db_path().clone())?;
//! let scheduler = Scheduler::new(
//!     store,
//!     Arc::new(config.roster()),
//!     Arc::new(config.board_table()?),
//!     config.run_settings(),
//! );
//! let (_stop_tx, stop_rx) = tokio::sync::watch::channel(Shutdown::Running);
//! let report = scheduler.run(&config.contestant_names(), stop_rx).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod agent;
mod config;
mod db;
mod llm_client;
mod scheduler;
mod verify;

// Crate-level exports - Agents
pub use agent::{
    Agent, AgentError, AgentFactory, LlmAgent, ScriptedAgent, ScriptedStrategy,
    action_from_tool_call, action_tools, extract_action,
};

// Crate-level exports - Configuration
pub use config::{BenchConfig, ConfigError, ContestantConfig, ContestantKind, Roster};

// Crate-level exports - Store
pub use db::{
    ClaimEvent, ClaimEventKind, ClaimPolicy, CommitOutcome, DbError, DbErrorKind, InvocationRow,
    MatchExport, MatchRecord, MatchStore, MatchSummary, Pairing, PairingStatus, RunProgress,
    TurnInvocation,
};

// Crate-level exports - LLM client
pub use llm_client::{
    Completion, LlmClient, LlmConfig, LlmError, LlmInvocation, LlmProvider, TokenUsage, ToolCall,
    ToolSpec,
};

// Crate-level exports - Scheduler
pub use scheduler::{RunReport, RunSettings, Scheduler, SchedulerError, Shutdown};

// Crate-level exports - Verification
pub use verify::{VerifyError, verify_export};
