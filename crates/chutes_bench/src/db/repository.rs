//! SQLite-backed store for pairings, transcripts and match records.

use chrono::Utc;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use chutes_ladders::TurnRecord;

use crate::db::{
    ClaimEvent, ClaimEventKind, ClaimPolicy, CommitOutcome, DbError, DbErrorKind, InvocationRow,
    MatchExport, MatchRecord, MatchSummary, NewClaimEvent, NewInvocationRow, NewMatchRecord,
    NewPairing, NewTurnRow, Pairing, PairingStatus, RunProgress, TurnInvocation, TurnRow, schema,
};
use crate::llm_client::LlmInvocation;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Attempts per operation before lock contention is reported.
const BUSY_RETRIES: u32 = 8;

/// First backoff delay; doubles on each retry.
const BUSY_BACKOFF: Duration = Duration::from_millis(10);

const CONNECTION_PRAGMAS: &str = "PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;";

/// Durable store shared by every worker of a run.
///
/// Each operation opens its own connection, so the store is cheap to clone
/// and safe to use from many threads. All state transitions run inside
/// `BEGIN IMMEDIATE` transactions.
#[derive(Debug, Clone)]
pub struct MatchStore {
    db_path: String,
}

impl MatchStore {
    /// Opens the database at `db_path`, creating it and applying migrations
    /// as needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the file cannot be opened or migrated.
    #[instrument(skip(db_path))]
    pub fn open(db_path: impl Into<String>) -> Result<Self, DbError> {
        let db_path = db_path.into();
        info!(path = %db_path, "Opening MatchStore");

        let store = Self { db_path };
        let mut conn = store.connection()?;
        conn.batch_execute("PRAGMA journal_mode = WAL;")?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| DbError::new(format!("Migrations failed: {}", e)))?;
        debug!(applied = applied.len(), "Migrations applied");

        Ok(store)
    }

    /// Path of the underlying database file.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Establishes a database connection.
    #[instrument(skip(self))]
    fn connection(&self) -> Result<SqliteConnection, DbError> {
        let mut conn = SqliteConnection::establish(&self.db_path)
            .map_err(|e| DbError::new(format!("Failed to connect to '{}': {}", self.db_path, e)))?;
        conn.batch_execute(CONNECTION_PRAGMAS)?;
        Ok(conn)
    }

    /// Runs `op` on a fresh connection, retrying with exponential backoff
    /// while SQLite reports lock contention.
    fn with_retry<T>(
        &self,
        name: &'static str,
        mut op: impl FnMut(&mut SqliteConnection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        let mut attempt = 0;
        loop {
            match self.connection().and_then(|mut conn| op(&mut conn)) {
                Err(e) if e.is_busy() && attempt < BUSY_RETRIES => {
                    let delay = BUSY_BACKOFF * 2u32.pow(attempt);
                    warn!(operation = name, attempt, ?delay, "Database busy, backing off");
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Inserts every ordered pair of distinct contestants for each trial.
    ///
    /// Existing pairings are left untouched, so this is safe to call at the
    /// start of every run. Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, contestants), fields(contestants = contestants.len()))]
    pub fn enumerate_pairings(&self, contestants: &[String], trials: u32) -> Result<usize, DbError> {
        let trials = i32::try_from(trials)
            .map_err(|_| DbError::new(format!("Trial count too large: {}", trials)))?;

        let mut rows = Vec::new();
        for trial in 0..trials {
            for a in contestants {
                for b in contestants.iter().filter(|b| *b != a) {
                    rows.push(NewPairing::new(a.clone(), b.clone(), trial));
                }
            }
        }

        let inserted = self.with_retry("enumerate_pairings", |conn| {
            conn.immediate_transaction::<_, DbError, _>(|conn| {
                let mut inserted = 0;
                for row in &rows {
                    inserted += diesel::insert_or_ignore_into(schema::pairings::table)
                        .values(row)
                        .execute(conn)?;
                }
                Ok(inserted)
            })
        })?;

        info!(
            scheduled = rows.len(),
            inserted,
            existing = rows.len() - inserted,
            "Pairings enumerated"
        );
        Ok(inserted)
    }

    /// Atomically claims the lowest-numbered claimable pairing for `worker_id`.
    ///
    /// Claimable means pending, failed, or claimed with a claim older than
    /// the policy's liveness threshold, and attempted fewer than
    /// `max_attempts` times. Returns `None` when nothing is claimable.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self, policy))]
    pub fn claim_next_pending(
        &self,
        worker_id: &str,
        policy: &ClaimPolicy,
    ) -> Result<Option<Pairing>, DbError> {
        use schema::pairings::dsl;

        let liveness = chrono::Duration::from_std(*policy.liveness())
            .map_err(|e| DbError::new(format!("Invalid claim liveness: {}", e)))?;
        let max_attempts = i32::try_from(*policy.max_attempts()).unwrap_or(i32::MAX);

        let claimed = self.with_retry("claim_next_pending", |conn| {
            conn.immediate_transaction::<_, DbError, _>(|conn| {
                let now = Utc::now().naive_utc();
                let stale_before = now - liveness;

                let candidate = dsl::pairings
                    .filter(dsl::attempts.lt(max_attempts))
                    .filter(
                        dsl::status
                            .eq_any(vec![
                                PairingStatus::Pending.to_db_string(),
                                PairingStatus::Failed.to_db_string(),
                            ])
                            .or(dsl::status
                                .eq(PairingStatus::Claimed.to_db_string())
                                .and(dsl::claimed_at.lt(stale_before))),
                    )
                    .order(dsl::id.asc())
                    .select(Pairing::as_select())
                    .first(conn)
                    .optional()?;

                let Some(candidate) = candidate else {
                    return Ok(None);
                };

                let previous = candidate.parse_status()?;
                let kind = if previous == PairingStatus::Pending {
                    ClaimEventKind::Claimed
                } else {
                    ClaimEventKind::Reclaimed
                };
                let detail = (kind == ClaimEventKind::Reclaimed).then(|| {
                    format!(
                        "previous status {}, previous holder {}",
                        previous,
                        candidate.claimed_by().as_deref().unwrap_or("none")
                    )
                });

                let pairing = diesel::update(dsl::pairings.find(*candidate.id()))
                    .set((
                        dsl::status.eq(PairingStatus::Claimed.to_db_string()),
                        dsl::claimed_by.eq(Some(worker_id)),
                        dsl::claimed_at.eq(Some(now)),
                        dsl::attempts.eq(dsl::attempts + 1),
                    ))
                    .returning(Pairing::as_returning())
                    .get_result(conn)?;

                diesel::insert_into(schema::claim_events::table)
                    .values(NewClaimEvent::new(*pairing.id(), worker_id, kind, detail))
                    .execute(conn)?;

                Ok(Some(pairing))
            })
        })?;

        match &claimed {
            Some(p) => info!(
                pairing_id = p.id(),
                player_a = %p.player_a(),
                player_b = %p.player_b(),
                trial = p.trial(),
                attempt = p.attempts(),
                "Pairing claimed"
            ),
            None => debug!("No claimable pairing"),
        }
        Ok(claimed)
    }

    /// Appends one transcript entry with the model calls behind it and
    /// renews the claim timestamp, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::ClaimLost`] error if `worker_id` no longer
    /// holds attempt `attempt` of the pairing, or [`DbError`] on a database
    /// error.
    #[instrument(
        skip(self, record, invocations),
        fields(turn = record.turn, slot = %record.slot, calls = invocations.len())
    )]
    pub fn record_turn(
        &self,
        pairing_id: i32,
        worker_id: &str,
        attempt: i32,
        seq: i32,
        record: &TurnRecord,
        invocations: &[LlmInvocation],
    ) -> Result<(), DbError> {
        let row = NewTurnRow::from_record(pairing_id, attempt, seq, record)?;

        self.with_retry("record_turn", |conn| {
            conn.immediate_transaction::<_, DbError, _>(|conn| {
                renew_claim(conn, pairing_id, worker_id, attempt)?;
                let turn_log_id: i32 = diesel::insert_into(schema::turn_log::table)
                    .values(&row)
                    .returning(schema::turn_log::id)
                    .get_result(conn)?;

                let calls = invocations
                    .iter()
                    .enumerate()
                    .map(|(index, invocation)| {
                        NewInvocationRow::from_invocation(turn_log_id, index, invocation)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if !calls.is_empty() {
                    diesel::insert_into(schema::llm_invocations::table)
                        .values(&calls)
                        .execute(conn)?;
                }
                Ok(())
            })
        })?;

        debug!("Turn recorded");
        Ok(())
    }

    /// Writes the match record and marks the pairing completed in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::ClaimLost`] error if the caller no longer
    /// holds the claim, or [`DbError`] on a database error. Nothing is
    /// written in either case.
    #[instrument(skip(self, pairing, summary), fields(pairing_id = pairing.id(), status = %summary.status()))]
    pub fn commit_result(
        &self,
        pairing: &Pairing,
        worker_id: &str,
        summary: &MatchSummary,
    ) -> Result<CommitOutcome, DbError> {
        self.commit_with_hook(pairing, worker_id, summary, |_| Ok(()))
    }

    /// Commit body; `between_writes` runs after the record insert and before
    /// the pairing update.
    fn commit_with_hook(
        &self,
        pairing: &Pairing,
        worker_id: &str,
        summary: &MatchSummary,
        mut between_writes: impl FnMut(&mut SqliteConnection) -> Result<(), DbError>,
    ) -> Result<CommitOutcome, DbError> {
        use schema::pairings::dsl;

        let status = *summary.status();
        let record = NewMatchRecord {
            pairing_id: *pairing.id(),
            attempt: *pairing.attempts(),
            player_a: pairing.player_a().clone(),
            player_b: pairing.player_b().clone(),
            status: status.code().to_string(),
            winner: status.winner().map(|slot| match slot {
                chutes_ladders::Slot::A => pairing.player_a().clone(),
                chutes_ladders::Slot::B => pairing.player_b().clone(),
            }),
            turns: i32::try_from(*summary.turns()).unwrap_or(i32::MAX),
            // Stored bit-for-bit; SQLite has no unsigned 64-bit column.
            seed: *summary.seed() as i64,
            started_at: *summary.started_at(),
            finished_at: *summary.finished_at(),
        };

        let outcome = self.with_retry("commit_result", |conn| {
            conn.immediate_transaction::<_, DbError, _>(|conn| {
                let current = dsl::pairings
                    .find(record.pairing_id)
                    .select(Pairing::as_select())
                    .first(conn)
                    .optional()?
                    .ok_or_else(|| {
                        DbError::with_kind(
                            DbErrorKind::NotFound,
                            format!("Pairing {} not found", record.pairing_id),
                        )
                    })?;

                if current.parse_status()? == PairingStatus::Completed {
                    return Ok(CommitOutcome::AlreadyCompleted);
                }
                ensure_owner(&current, worker_id, record.attempt)?;

                diesel::insert_into(schema::matches::table)
                    .values(&record)
                    .execute(conn)?;

                between_writes(conn)?;

                diesel::update(dsl::pairings.find(record.pairing_id))
                    .set((
                        dsl::status.eq(PairingStatus::Completed.to_db_string()),
                        dsl::last_error.eq(None::<String>),
                    ))
                    .execute(conn)?;

                diesel::insert_into(schema::claim_events::table)
                    .values(NewClaimEvent::new(
                        record.pairing_id,
                        worker_id,
                        ClaimEventKind::Completed,
                        Some(record.status.clone()),
                    ))
                    .execute(conn)?;

                Ok(CommitOutcome::Committed)
            })
        })?;

        match outcome {
            CommitOutcome::Committed => info!(winner = ?record.winner, "Match committed"),
            CommitOutcome::AlreadyCompleted => warn!("Pairing already completed, commit skipped"),
        }
        Ok(outcome)
    }

    /// Marks the caller's claim failed so another attempt can pick it up.
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::ClaimLost`] error if `worker_id` does not hold
    /// the claim, or [`DbError`] on a database error.
    #[instrument(skip(self, reason))]
    pub fn release_claim(&self, pairing_id: i32, worker_id: &str, reason: &str) -> Result<(), DbError> {
        use schema::pairings::dsl;

        self.with_retry("release_claim", |conn| {
            conn.immediate_transaction::<_, DbError, _>(|conn| {
                let released = diesel::update(
                    dsl::pairings
                        .filter(dsl::id.eq(pairing_id))
                        .filter(dsl::status.eq(PairingStatus::Claimed.to_db_string()))
                        .filter(dsl::claimed_by.eq(worker_id)),
                )
                .set((
                    dsl::status.eq(PairingStatus::Failed.to_db_string()),
                    dsl::claimed_by.eq(None::<String>),
                    dsl::claimed_at.eq(None::<chrono::NaiveDateTime>),
                    dsl::last_error.eq(Some(reason)),
                ))
                .execute(conn)?;

                if released == 0 {
                    return Err(DbError::with_kind(
                        DbErrorKind::ClaimLost,
                        format!("Worker {} does not hold pairing {}", worker_id, pairing_id),
                    ));
                }

                diesel::insert_into(schema::claim_events::table)
                    .values(NewClaimEvent::new(
                        pairing_id,
                        worker_id,
                        ClaimEventKind::Released,
                        Some(reason.to_string()),
                    ))
                    .execute(conn)?;
                Ok(())
            })
        })?;

        warn!(%reason, "Claim released");
        Ok(())
    }

    /// Counts pairings by state.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn progress(&self) -> Result<RunProgress, DbError> {
        use schema::pairings::dsl;

        let rows = self.with_retry("progress", |conn| {
            Ok(dsl::pairings
                .select((dsl::status, dsl::attempts))
                .load::<(String, i32)>(conn)?)
        })?;
        let progress = RunProgress::tally(&rows)?;
        debug!(%progress, "Progress computed");
        Ok(progress)
    }

    /// Lists all pairings in claim order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn list_pairings(&self) -> Result<Vec<Pairing>, DbError> {
        use schema::pairings::dsl;

        self.with_retry("list_pairings", |conn| {
            Ok(dsl::pairings
                .order(dsl::id.asc())
                .select(Pairing::as_select())
                .load(conn)?)
        })
    }

    /// Gets one pairing. Returns `None` if not found.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn pairing(&self, pairing_id: i32) -> Result<Option<Pairing>, DbError> {
        use schema::pairings::dsl;

        self.with_retry("pairing", |conn| {
            Ok(dsl::pairings
                .find(pairing_id)
                .select(Pairing::as_select())
                .first(conn)
                .optional()?)
        })
    }

    /// Claim audit trail for one pairing, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn claim_history(&self, pairing_id: i32) -> Result<Vec<ClaimEvent>, DbError> {
        use schema::claim_events::dsl;

        self.with_retry("claim_history", |conn| {
            Ok(dsl::claim_events
                .filter(dsl::pairing_id.eq(pairing_id))
                .order(dsl::id.asc())
                .select(ClaimEvent::as_select())
                .load(conn)?)
        })
    }

    /// Gets the committed record for a pairing. Returns `None` if the
    /// pairing has not completed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn match_record(&self, pairing_id: i32) -> Result<Option<MatchRecord>, DbError> {
        use schema::matches::dsl;

        self.with_retry("match_record", |conn| {
            Ok(dsl::matches
                .filter(dsl::pairing_id.eq(pairing_id))
                .select(MatchRecord::as_select())
                .first(conn)
                .optional()?)
        })
    }

    /// All committed records, in pairing order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs.
    #[instrument(skip(self))]
    pub fn match_records(&self) -> Result<Vec<MatchRecord>, DbError> {
        use schema::matches::dsl;

        let records = self.with_retry("match_records", |conn| {
            Ok(dsl::matches
                .order(dsl::pairing_id.asc())
                .select(MatchRecord::as_select())
                .load(conn)?)
        })?;
        info!(count = records.len(), "Match records loaded");
        Ok(records)
    }

    /// Stored transcript of one attempt, in sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs or a row fails to decode.
    #[instrument(skip(self))]
    pub fn transcript(&self, pairing_id: i32, attempt: i32) -> Result<Vec<TurnRecord>, DbError> {
        use schema::turn_log::dsl;

        let rows = self.with_retry("transcript", |conn| {
            Ok(dsl::turn_log
                .filter(dsl::pairing_id.eq(pairing_id))
                .filter(dsl::attempt.eq(attempt))
                .order(dsl::seq.asc())
                .select(TurnRow::as_select())
                .load(conn)?)
        })?;
        rows.iter().map(TurnRow::to_record).collect()
    }

    /// Model calls recorded for one attempt, in transcript order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs or a row fails to decode.
    #[instrument(skip(self))]
    pub fn invocations(
        &self,
        pairing_id: i32,
        attempt: i32,
    ) -> Result<Vec<TurnInvocation>, DbError> {
        use schema::{llm_invocations, turn_log};

        let rows: Vec<(i32, InvocationRow)> = self.with_retry("invocations", |conn| {
            Ok(llm_invocations::table
                .inner_join(turn_log::table)
                .filter(turn_log::pairing_id.eq(pairing_id))
                .filter(turn_log::attempt.eq(attempt))
                .order((turn_log::seq.asc(), llm_invocations::call_index.asc()))
                .select((turn_log::seq, InvocationRow::as_select()))
                .load(conn)?)
        })?;
        rows.iter()
            .map(|(seq, row)| Ok(TurnInvocation::new(*seq, *row.call_index(), row.to_invocation()?)))
            .collect()
    }

    /// Every committed record joined with the transcript and model calls of
    /// its committed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a database error occurs or a row fails to decode.
    #[instrument(skip(self))]
    pub fn export(&self) -> Result<Vec<MatchExport>, DbError> {
        self.match_records()?
            .into_iter()
            .map(|record| {
                let (pairing_id, attempt) = (*record.pairing_id(), *record.attempt());
                let transcript = self.transcript(pairing_id, attempt)?;
                let invocations = self.invocations(pairing_id, attempt)?;
                Ok(MatchExport::new(record, transcript, invocations))
            })
            .collect()
    }
}

/// Fails with `ClaimLost` unless `worker_id` holds attempt `attempt`.
fn ensure_owner(current: &Pairing, worker_id: &str, attempt: i32) -> Result<(), DbError> {
    let owned = current.parse_status()? == PairingStatus::Claimed
        && current.claimed_by().as_deref() == Some(worker_id)
        && *current.attempts() == attempt;
    if owned {
        Ok(())
    } else {
        Err(DbError::with_kind(
            DbErrorKind::ClaimLost,
            format!(
                "Worker {} no longer holds attempt {} of pairing {}",
                worker_id,
                attempt,
                current.id()
            ),
        ))
    }
}

/// Bumps `claimed_at` if the caller still owns the claim.
fn renew_claim(
    conn: &mut SqliteConnection,
    pairing_id: i32,
    worker_id: &str,
    attempt: i32,
) -> Result<(), DbError> {
    use schema::pairings::dsl;

    let renewed = diesel::update(
        dsl::pairings
            .filter(dsl::id.eq(pairing_id))
            .filter(dsl::status.eq(PairingStatus::Claimed.to_db_string()))
            .filter(dsl::claimed_by.eq(worker_id))
            .filter(dsl::attempts.eq(attempt)),
    )
    .set(dsl::claimed_at.eq(Some(Utc::now().naive_utc())))
    .execute(conn)?;

    if renewed == 0 {
        return Err(DbError::with_kind(
            DbErrorKind::ClaimLost,
            format!(
                "Worker {} no longer holds attempt {} of pairing {}",
                worker_id, attempt, pairing_id
            ),
        ));
    }
    Ok(())
}
