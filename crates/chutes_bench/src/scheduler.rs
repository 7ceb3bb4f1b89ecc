//! Resumable pairing scheduler.
//!
//! Workers are tokio tasks that share nothing but the [`MatchStore`]. Each
//! one loops: claim a pairing, play it to a terminal state while persisting
//! every transcript entry, commit, repeat. A worker that fails mid-match
//! releases its claim before giving up so the pairing can be retried.
//!
//! The [`Shutdown`] channel stops a run in two steps: `Drain` lets each
//! worker finish its current match, `Abort` cancels in-flight agent calls
//! and releases the claims.

use chrono::Utc;
use chutes_ladders::{BoardTable, Match, MatchError, SeededSpinner, Slot};
use derive_getters::Getters;
use derive_more::{Display, Error, From};
use derive_setters::Setters;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};

use crate::agent::{Agent, AgentError, AgentFactory};
use crate::db::{
    ClaimPolicy, CommitOutcome, DbError, DbErrorKind, MatchStore, MatchSummary, Pairing,
    RunProgress,
};

/// Stop signal shared by every worker of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum Shutdown {
    /// Keep claiming pairings.
    #[default]
    #[display("running")]
    Running,
    /// Finish the current match, then stop claiming.
    #[display("draining")]
    Drain,
    /// Stop now; release the current claim.
    #[display("aborting")]
    Abort,
}

impl Shutdown {
    /// Next state after another interrupt.
    pub fn escalate(self) -> Self {
        match self {
            Shutdown::Running => Shutdown::Drain,
            Shutdown::Drain | Shutdown::Abort => Shutdown::Abort,
        }
    }
}

/// Resolves once `stop` reads `Abort`. Never resolves if the sender is gone.
async fn abort_requested(stop: &mut watch::Receiver<Shutdown>) {
    if stop.wait_for(|state| *state == Shutdown::Abort).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Setters)]
#[setters(prefix = "with_")]
pub struct RunSettings {
    /// Matches per ordered pair of contestants.
    trials: u32,
    /// Completed turns after which a match stops with `TurnLimit`.
    max_turns: u32,
    /// Actions one seat may take within a single turn.
    max_actions_per_turn: u32,
    /// Bound on each agent call.
    agent_timeout: Duration,
    /// Claims idle longer than this may be taken over.
    claim_liveness: Duration,
    /// Claims per pairing before it is left failed.
    max_attempts: u32,
    /// Concurrent workers.
    workers: usize,
    /// Mixed with each pairing id to seed its spinner.
    seed: u64,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            trials: 1,
            max_turns: 200,
            max_actions_per_turn: 20,
            agent_timeout: Duration::from_secs(60),
            claim_liveness: Duration::from_secs(15 * 60),
            max_attempts: 3,
            workers: 1,
            seed: 0,
        }
    }
}

impl RunSettings {
    /// Claim rules derived from these settings.
    pub fn claim_policy(&self) -> ClaimPolicy {
        ClaimPolicy::new(self.claim_liveness, self.max_attempts)
    }

    /// Spinner seed for a pairing. Every attempt of a pairing draws the
    /// same spins.
    pub fn seed_for(&self, pairing_id: i32) -> u64 {
        self.seed ^ u64::from(pairing_id.unsigned_abs()).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

/// Summary of one invocation of [`Scheduler::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct RunReport {
    /// Store-wide pairing counts after the run.
    progress: RunProgress,
    /// Matches committed by this invocation.
    matches_played: usize,
    /// Workers that stopped on an unrecoverable error.
    aborted_workers: usize,
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} played this run, {} workers aborted)",
            self.progress, self.matches_played, self.aborted_workers
        )
    }
}

/// Errors that stop a worker or a run.
#[derive(Debug, Display, Error, From)]
pub enum SchedulerError {
    /// Store failure.
    #[display("store: {_0}")]
    Store(DbError),
    /// An agent could not be built for a claimed pairing.
    #[display("agent setup: {_0}")]
    Setup(AgentError),
    /// The match refused a call it should have accepted.
    #[display("match: {_0}")]
    Match(MatchError),
    /// The run was aborted mid-match.
    #[display("run aborted")]
    #[from(ignore)]
    Aborted,
    /// A blocking or worker task panicked or was cancelled.
    #[display("task failed: {_0}")]
    #[from(ignore)]
    Join(#[error(not(source))] String),
}

impl SchedulerError {
    fn is_claim_lost(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.kind == DbErrorKind::ClaimLost)
    }
}

/// Runs a store operation on the blocking pool.
async fn blocking<T, F>(store: &MatchStore, op: F) -> Result<T, SchedulerError>
where
    T: Send + 'static,
    F: FnOnce(&MatchStore) -> Result<T, DbError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| SchedulerError::Join(e.to_string()))?
        .map_err(SchedulerError::from)
}

/// Drives every pairing of a run to completion.
#[derive(Clone)]
pub struct Scheduler {
    store: MatchStore,
    factory: Arc<dyn AgentFactory>,
    table: Arc<BoardTable>,
    settings: RunSettings,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over a store, an agent factory and a board.
    pub fn new(
        store: MatchStore,
        factory: Arc<dyn AgentFactory>,
        table: Arc<BoardTable>,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            factory,
            table,
            settings,
        }
    }

    /// Run settings.
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Enumerates pairings and runs workers until no claimable pairing
    /// remains or `stop` leaves [`Shutdown::Running`].
    ///
    /// Calling this again on the same store resumes the run.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] if pairings cannot be enumerated or the
    /// final progress cannot be read. Worker failures are counted in the
    /// report instead.
    #[instrument(skip(self, contestants, stop), fields(contestants = contestants.len(), workers = self.settings.workers))]
    pub async fn run(
        &self,
        contestants: &[String],
        stop: watch::Receiver<Shutdown>,
    ) -> Result<RunReport, SchedulerError> {
        let started = Instant::now();
        let names = contestants.to_vec();
        let trials = self.settings.trials;
        blocking(&self.store, move |store| store.enumerate_pairings(&names, trials)).await?;

        let mut workers = JoinSet::new();
        for index in 0..self.settings.workers.max(1) {
            let worker_id = format!("worker-{}-{}", std::process::id(), index);
            let span = info_span!("worker", worker_id = %worker_id);
            let scheduler = self.clone();
            let stop = stop.clone();
            workers.spawn(async move { scheduler.work(worker_id, stop).await }.instrument(span));
        }

        let mut matches_played = 0;
        let mut aborted_workers = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(played)) => matches_played += played,
                Ok(Err(e)) => {
                    error!(error = %e, "Worker aborted");
                    aborted_workers += 1;
                }
                Err(e) => {
                    error!(error = %e, "Worker task failed");
                    aborted_workers += 1;
                }
            }
        }

        let progress = blocking(&self.store, |store| store.progress()).await?;
        info!(
            %progress,
            matches_played,
            aborted_workers,
            elapsed = ?started.elapsed(),
            "Run finished"
        );
        Ok(RunReport {
            progress,
            matches_played,
            aborted_workers,
        })
    }

    /// One worker's claim loop. Returns the number of matches it committed.
    async fn work(
        &self,
        worker_id: String,
        stop: watch::Receiver<Shutdown>,
    ) -> Result<usize, SchedulerError> {
        let policy = self.settings.claim_policy();
        let mut played = 0;

        loop {
            let state = *stop.borrow();
            if state != Shutdown::Running {
                info!(%state, "Stop requested, worker exiting");
                break;
            }

            let id = worker_id.clone();
            let Some(pairing) =
                blocking(&self.store, move |store| store.claim_next_pending(&id, &policy)).await?
            else {
                debug!("No claimable pairings left");
                break;
            };

            let pairing_id = *pairing.id();
            match self.play(&worker_id, &pairing, stop.clone()).await {
                Ok(CommitOutcome::Committed) => played += 1,
                Ok(CommitOutcome::AlreadyCompleted) => {}
                Err(e) => {
                    error!(pairing_id, error = %e, "Match failed");
                    let id = worker_id.clone();
                    let reason = e.to_string();
                    if let Err(release) =
                        blocking(&self.store, move |store| store.release_claim(pairing_id, &id, &reason)).await
                    {
                        warn!(pairing_id, error = %release, "Could not release claim");
                    }
                    if matches!(e, SchedulerError::Aborted) {
                        break;
                    }
                    if !e.is_claim_lost() {
                        return Err(e);
                    }
                }
            }
        }

        info!(played, "Worker finished");
        Ok(played)
    }

    /// Plays one claimed pairing to a terminal state and commits it.
    #[instrument(skip(self, pairing, stop), fields(pairing_id = pairing.id(), attempt = pairing.attempts()))]
    async fn play(
        &self,
        worker_id: &str,
        pairing: &Pairing,
        mut stop: watch::Receiver<Shutdown>,
    ) -> Result<CommitOutcome, SchedulerError> {
        let pairing_id = *pairing.id();
        let attempt = *pairing.attempts();
        let seed = self.settings.seed_for(pairing_id);

        let mut agents: [Box<dyn Agent>; 2] = [
            self.factory.build(pairing.player_a())?,
            self.factory.build(pairing.player_b())?,
        ];
        info!(
            player_a = %agents[0].name(),
            player_b = %agents[1].name(),
            seed,
            "Match starting"
        );

        let mut game = Match::new(Arc::clone(&self.table), SeededSpinner::new(seed));
        let started_at = Utc::now().naive_utc();
        let mut seq = 0;
        let mut turn = game.turn_number();
        let mut actions_this_turn = 0;

        while game.status().is_in_progress() {
            if *stop.borrow() == Shutdown::Abort {
                return Err(SchedulerError::Aborted);
            }
            if game.completed_turns() >= self.settings.max_turns {
                game.halt_on_turn_limit()?;
                break;
            }
            if game.turn_number() != turn {
                turn = game.turn_number();
                actions_this_turn = 0;
            }

            let agent = match game.active() {
                Slot::A => &mut agents[0],
                Slot::B => &mut agents[1],
            };

            let record = if actions_this_turn >= self.settings.max_actions_per_turn {
                game.record_agent_failure(format!(
                    "exceeded {} actions in one turn",
                    self.settings.max_actions_per_turn
                ))?
            } else {
                let choice = {
                    let view = game.view();
                    tokio::select! {
                        reply = tokio::time::timeout(self.settings.agent_timeout, agent.choose(&view)) => Some(reply),
                        () = abort_requested(&mut stop) => None,
                    }
                };
                let Some(choice) = choice else {
                    warn!("Abort requested during agent call");
                    return Err(SchedulerError::Aborted);
                };
                match choice {
                    Ok(Ok(action)) => game.apply(action)?,
                    Ok(Err(e)) => game.record_agent_failure(e.to_string())?,
                    Err(_) => game.record_agent_failure(format!(
                        "no reply within {:?}",
                        self.settings.agent_timeout
                    ))?,
                }
            };
            actions_this_turn += 1;
            let invocations = agent.drain_invocations();

            debug!(
                turn = record.turn,
                slot = %record.slot,
                accepted = record.verdict.is_accepted(),
                "Turn applied"
            );
            let id = worker_id.to_string();
            blocking(&self.store, move |store| {
                store.record_turn(pairing_id, &id, attempt, seq, &record, &invocations)
            })
            .await?;
            seq += 1;
        }

        let summary = MatchSummary::new(
            game.status(),
            game.turns_played(),
            seed,
            started_at,
            Utc::now().naive_utc(),
        );
        info!(status = %game.status(), turns = game.turns_played(), "Match finished");

        let pairing = pairing.clone();
        let id = worker_id.to_string();
        blocking(&self.store, move |store| store.commit_result(&pairing, &id, &summary)).await
    }
}
