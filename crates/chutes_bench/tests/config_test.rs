//! Tests for TOML configuration, the roster, and reply parsing.

use std::time::Duration;

use chutes_bench::{
    AgentError, AgentFactory, BenchConfig, ContestantKind, LlmProvider, ScriptedStrategy,
    extract_action,
};
use chutes_ladders::Action;

const FULL: &str = r#"
db_path = "runs/bench.db"
trials = 3
max_turns = 150
agent_timeout_secs = 20
workers = 4
seed = 99

[[contestants]]
name = "gpt"
kind = "llm"
model = "gpt-4o-mini"

[[contestants]]
name = "claude"
kind = "llm"
provider = "anthropic"
model = "claude-sonnet-4-5"
max_tokens = 500

[[contestants]]
name = "baseline"
kind = "scripted"
strategy = "runner"
"#;

const MINIMAL: &str = r#"
[[contestants]]
name = "left"
kind = "scripted"
strategy = "runner"

[[contestants]]
name = "right"
kind = "scripted"
strategy = "chatter"
"#;

#[test]
fn test_parse_full_config() {
    let config = BenchConfig::from_toml(FULL).expect("Config parses");
    assert_eq!(config.db_path(), "runs/bench.db");
    assert_eq!(config.contestant_names(), ["gpt", "claude", "baseline"]);

    let contestants = config.contestants();
    assert_eq!(
        contestants[0].kind(),
        &ContestantKind::Llm {
            provider: LlmProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
        }
    );
    assert_eq!(
        contestants[1].kind(),
        &ContestantKind::Llm {
            provider: LlmProvider::Anthropic,
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 500,
        }
    );
    assert_eq!(
        contestants[2].kind(),
        &ContestantKind::Scripted {
            strategy: ScriptedStrategy::Runner
        }
    );

    let settings = config.run_settings();
    assert_eq!(*settings.trials(), 3);
    assert_eq!(*settings.max_turns(), 150);
    assert_eq!(*settings.agent_timeout(), Duration::from_secs(20));
    assert_eq!(*settings.workers(), 4);
    assert_eq!(*settings.seed(), 99);
}

#[test]
fn test_defaults_apply() {
    let config = BenchConfig::from_toml(MINIMAL).expect("Config parses");
    assert_eq!(config.db_path(), "chutes_bench.db");

    let settings = config.run_settings();
    assert_eq!(*settings.trials(), 1);
    assert_eq!(*settings.max_turns(), 200);
    assert_eq!(*settings.max_actions_per_turn(), 20);
    assert_eq!(*settings.agent_timeout(), Duration::from_secs(60));
    assert_eq!(*settings.claim_liveness(), Duration::from_secs(900));
    assert_eq!(*settings.max_attempts(), 3);
    assert_eq!(*settings.workers(), 1);

    let table = config.board_table().expect("Standard board");
    assert_eq!(table.transitions().count(), 19);
}

#[test]
fn test_duplicate_names_rejected() {
    let toml = r#"
[[contestants]]
name = "twin"
kind = "scripted"
strategy = "runner"

[[contestants]]
name = "twin"
kind = "scripted"
strategy = "stall"
"#;
    let err = BenchConfig::from_toml(toml).unwrap_err();
    assert!(err.message.contains("Duplicate contestant 'twin'"));
}

#[test]
fn test_single_contestant_rejected() {
    let toml = r#"
[[contestants]]
name = "alone"
kind = "scripted"
strategy = "runner"
"#;
    assert!(BenchConfig::from_toml(toml).is_err());
}

#[test]
fn test_claim_ttl_must_outlast_agent_timeout() {
    let zero = format!("claim_ttl_secs = 0\n{}", MINIMAL);
    let err = BenchConfig::from_toml(&zero).unwrap_err();
    assert!(err.message.contains("claim_ttl_secs (0) must exceed agent_timeout_secs (60)"));

    let equal = format!("agent_timeout_secs = 30\nclaim_ttl_secs = 30\n{}", MINIMAL);
    assert!(BenchConfig::from_toml(&equal).is_err());

    let longer = format!("agent_timeout_secs = 30\nclaim_ttl_secs = 31\n{}", MINIMAL);
    let config = BenchConfig::from_toml(&longer).expect("Config parses");
    assert_eq!(*config.run_settings().claim_liveness(), Duration::from_secs(31));
}

#[test]
fn test_zero_agent_timeout_rejected() {
    let toml = format!("agent_timeout_secs = 0\n{}", MINIMAL);
    let err = BenchConfig::from_toml(&toml).unwrap_err();
    assert!(err.message.contains("agent_timeout_secs must be positive"));
}

#[test]
fn test_unknown_strategy_rejected() {
    let toml = MINIMAL.replace("chatter", "cheater");
    assert!(BenchConfig::from_toml(&toml).is_err());
}

#[test]
fn test_board_override() {
    let toml = format!("board = [[3, 50], [60, 2]]\n{}", MINIMAL);
    let config = BenchConfig::from_toml(&toml).expect("Config parses");
    let table = config.board_table().expect("Valid board");
    assert_eq!(table.transitions().count(), 2);
    assert!(table.transition(3).is_some());
    assert!(table.transition(1).is_none());
}

#[test]
fn test_invalid_board_rejected() {
    let toml = format!("board = [[10, 10]]\n{}", MINIMAL);
    let err = BenchConfig::from_toml(&toml).unwrap_err();
    assert!(err.message.contains("Invalid board"));
}

#[test]
fn test_retain_contestants() {
    let mut config = BenchConfig::from_toml(FULL).expect("Config parses");
    config
        .retain_contestants(&["baseline".to_string(), "gpt".to_string()])
        .expect("Known names");
    assert_eq!(config.contestant_names(), ["gpt", "baseline"]);

    let err = config
        .retain_contestants(&["nobody".to_string(), "gpt".to_string()])
        .unwrap_err();
    assert!(err.message.contains("Unknown contestant 'nobody'"));

    assert!(config.retain_contestants(&["gpt".to_string()]).is_err());
}

#[test]
fn test_roster_builds_scripted_agents() {
    let config = BenchConfig::from_toml(MINIMAL).expect("Config parses");
    let roster = config.roster();

    let agent = roster.build("right").expect("Agent builds");
    assert_eq!(agent.name(), "right");

    let err = roster.build("stranger").err().expect("Unknown contestant");
    assert!(matches!(err, AgentError::Setup(_)));
}

#[test]
fn test_llm_config_requires_llm_contestant() {
    let config = BenchConfig::from_toml(MINIMAL).expect("Config parses");
    assert!(config.contestants()[0].create_llm_config().is_err());
}

#[test]
fn test_extract_action_from_prose() {
    let reply = "I'll take the ladder.\n```json\n{\"action\": \"ascend_ladder_to_square\", \"square\": 38}\n```";
    assert_eq!(
        extract_action(reply).expect("Action parses"),
        Action::Ascend { square: 38 }
    );
}

#[test]
fn test_extract_action_handles_braces_in_strings() {
    let reply = r#"{"action": "send_message", "message": "nice } move {"} and more text"#;
    assert_eq!(
        extract_action(reply).expect("Action parses"),
        Action::SendMessage {
            message: "nice } move {".to_string()
        }
    );
}

#[test]
fn test_extract_action_rejects_garbage() {
    assert!(matches!(
        extract_action("I choose to spin."),
        Err(AgentError::Malformed { .. })
    ));
    assert!(matches!(
        extract_action("{\"action\": \"spin_spinner\""),
        Err(AgentError::Malformed { .. })
    ));
    assert!(matches!(
        extract_action("{\"action\": \"teleport\"}"),
        Err(AgentError::Malformed { .. })
    ));
}
