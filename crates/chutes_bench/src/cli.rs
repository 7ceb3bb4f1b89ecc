//! Command-line interface for chutes_bench.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chutes Bench - resumable Chutes & Ladders tournaments between LLM agents
#[derive(Parser, Debug)]
#[command(name = "chutes_bench")]
#[command(about = "Resumable Chutes & Ladders tournaments between LLM agents", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start or resume a run
    Run {
        /// Path to the benchmark configuration
        #[arg(short, long, default_value = "bench.toml")]
        config: PathBuf,

        /// Override the database path from the config
        #[arg(long)]
        db: Option<String>,

        /// Override the number of concurrent workers
        #[arg(long)]
        workers: Option<usize>,

        /// Override the number of trials per ordered pair
        #[arg(long)]
        trials: Option<u32>,

        /// Override the turn cap per match
        #[arg(long)]
        max_turns: Option<u32>,

        /// Only schedule these contestants
        #[arg(long, num_args = 1..)]
        only: Vec<String>,
    },

    /// Show run progress, or one pairing in detail
    Status {
        /// Path to the database file
        #[arg(long, default_value = "chutes_bench.db")]
        db: String,

        /// Pairing to show in detail
        #[arg(long)]
        pairing: Option<i32>,
    },

    /// Write every committed match with its transcript as JSON
    Export {
        /// Path to the database file
        #[arg(long, default_value = "chutes_bench.db")]
        db: String,

        /// Output file
        #[arg(short, long, default_value = "matches.json")]
        output: PathBuf,
    },

    /// Replay every committed transcript and check it reproduces its record
    Verify {
        /// Path to the database file
        #[arg(long, default_value = "chutes_bench.db")]
        db: String,

        /// Config whose board override was used for the run
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
