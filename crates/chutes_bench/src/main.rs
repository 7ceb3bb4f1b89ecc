//! Chutes Bench - Unified CLI
//!
//! Runs, inspects and exports resumable Chutes & Ladders tournaments.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result, bail};
use chutes_bench::{BenchConfig, MatchStore, Scheduler, Shutdown, verify_export};
use chutes_ladders::BoardTable;
use clap::Parser;
use cli::{Cli, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chutes_bench=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            db,
            workers,
            trials,
            max_turns,
            only,
        } => run(config, db, workers, trials, max_turns, only).await,
        Command::Status { db, pairing } => status(db, pairing),
        Command::Export { db, output } => export(db, output),
        Command::Verify { db, config } => verify(db, config),
    }
}

/// Start or resume a run
#[instrument]
async fn run(
    config_path: PathBuf,
    db: Option<String>,
    workers: Option<usize>,
    trials: Option<u32>,
    max_turns: Option<u32>,
    only: Vec<String>,
) -> Result<()> {
    let mut config = BenchConfig::from_file(&config_path)?;
    if !only.is_empty() {
        config.retain_contestants(&only)?;
    }
    if let Some(db) = db {
        config.set_db_path(db);
    }

    let mut settings = config.run_settings();
    if let Some(workers) = workers {
        settings = settings.with_workers(workers);
    }
    if let Some(trials) = trials {
        settings = settings.with_trials(trials);
    }
    if let Some(max_turns) = max_turns {
        settings = settings.with_max_turns(max_turns);
    }

    let store = MatchStore::open(config.db_path().clone())?;
    let table = Arc::new(config.board_table()?);
    let scheduler = Scheduler::new(store, Arc::new(config.roster()), table, settings);

    let (stop_tx, stop_rx) = watch::channel(Shutdown::Running);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let state = stop_tx.borrow().escalate();
            match state {
                Shutdown::Drain => warn!("Interrupt received, workers will stop after their current match; interrupt again to abort"),
                _ => warn!("Second interrupt, aborting in-flight matches and releasing claims"),
            }
            if stop_tx.send(state).is_err() || state == Shutdown::Abort {
                break;
            }
        }
    });

    info!(contestants = ?config.contestant_names(), "Starting run");
    let report = scheduler.run(&config.contestant_names(), stop_rx).await?;
    println!("{report}");
    Ok(())
}

/// Show run progress, or one pairing in detail
#[instrument]
fn status(db: String, pairing: Option<i32>) -> Result<()> {
    let store = MatchStore::open(db)?;

    let Some(pairing_id) = pairing else {
        println!("{}", store.progress()?);
        for p in store.list_pairings()? {
            let outcome = store
                .match_record(*p.id())?
                .map(|r| r.status().clone())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:>5}  {} vs {}  trial {:<3} {:<10} attempts {}  {}",
                p.id(),
                p.player_a(),
                p.player_b(),
                p.trial(),
                p.status(),
                p.attempts(),
                outcome
            );
        }
        return Ok(());
    };

    let p = store
        .pairing(pairing_id)?
        .with_context(|| format!("No pairing {}", pairing_id))?;
    println!(
        "Pairing {}: {} vs {} (trial {}), {} after {} attempts",
        p.id(),
        p.player_a(),
        p.player_b(),
        p.trial(),
        p.status(),
        p.attempts()
    );
    if let Some(err) = p.last_error() {
        println!("Last error: {}", err);
    }

    println!("\nClaim history:");
    for event in store.claim_history(pairing_id)? {
        println!(
            "  {}  {:<10} {}  {}",
            event.at(),
            event.event(),
            event.worker_id(),
            event.detail().as_deref().unwrap_or("")
        );
    }

    if let Some(record) = store.match_record(pairing_id)? {
        println!(
            "\nResult: {} in {} turns (winner: {})",
            record.status(),
            record.turns(),
            record.winner().as_deref().unwrap_or("none")
        );
    }

    let invocations = store.invocations(pairing_id, *p.attempts())?;
    if !invocations.is_empty() {
        let tokens = |pick: fn(&chutes_bench::TokenUsage) -> Option<u32>| -> u64 {
            invocations
                .iter()
                .filter_map(|call| pick(call.invocation().usage()))
                .map(u64::from)
                .sum()
        };
        let failed = invocations
            .iter()
            .filter(|call| call.invocation().error().is_some())
            .count();
        println!(
            "\nModel calls: {} ({} failed), {} input / {} output tokens",
            invocations.len(),
            failed,
            tokens(|usage| usage.input_tokens),
            tokens(|usage| usage.output_tokens)
        );
    }

    println!("\nTranscript (attempt {}):", p.attempts());
    for entry in store.transcript(pairing_id, *p.attempts())? {
        let action = entry
            .action
            .as_ref()
            .map_or_else(|| "(no action)".to_string(), ToString::to_string);
        println!(
            "  turn {:>3} {}  {:<32} {} -> {}  {}",
            entry.turn,
            entry.slot,
            action,
            entry.before,
            entry.after,
            entry.verdict.message()
        );
    }
    Ok(())
}

/// Write every committed match with its transcript as JSON
#[instrument]
fn export(db: String, output: PathBuf) -> Result<()> {
    let store = MatchStore::open(db)?;
    let matches = store.export()?;
    let json = serde_json::to_string_pretty(&matches)?;
    std::fs::write(&output, json)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(count = matches.len(), output = %output.display(), "Matches exported");
    println!("Exported {} matches to {}", matches.len(), output.display());
    Ok(())
}

/// Replay every committed transcript and check it reproduces its record
#[instrument]
fn verify(db: String, config: Option<PathBuf>) -> Result<()> {
    let table = match config {
        Some(path) => BenchConfig::from_file(path)?.board_table()?,
        None => BoardTable::standard(),
    };
    let table = Arc::new(table);
    let store = MatchStore::open(db)?;

    let mut mismatches = 0;
    let matches = store.export()?;
    for exported in &matches {
        if let Err(e) = verify_export(Arc::clone(&table), exported) {
            warn!(pairing_id = exported.record().pairing_id(), error = %e, "Transcript failed verification");
            mismatches += 1;
        }
    }

    if mismatches > 0 {
        bail!("{} of {} transcripts failed verification", mismatches, matches.len());
    }
    println!("All {} transcripts verified", matches.len());
    Ok(())
}
