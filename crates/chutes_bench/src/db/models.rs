//! Database models and domain types.

use chrono::NaiveDateTime;
use chutes_ladders::{Action, MatchStatus, Positions, Slot, TurnRecord, Verdict};
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::instrument;

use crate::db::{DbError, DbErrorKind, schema};
use crate::llm_client::{LlmInvocation, LlmProvider, TokenUsage, ToolCall};

/// Lifecycle state of a pairing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PairingStatus {
    /// Not yet claimed.
    Pending,
    /// Held by a worker.
    Claimed,
    /// Result committed.
    Completed,
    /// Released after an error; eligible for another attempt.
    Failed,
}

impl PairingStatus {
    /// Converts status to the string stored in the database.
    pub fn to_db_string(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses status from the string stored in the database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the string is not a valid status value.
    #[instrument(skip(s), fields(s = %s))]
    pub fn from_db_string(s: &str) -> Result<Self, DbError> {
        match s {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(DbError::with_kind(
                DbErrorKind::Corrupt,
                format!("Invalid pairing status: '{}'", s),
            )),
        }
    }
}

/// One scheduled unit of work: an ordered pair of contestants and a trial index.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::pairings)]
pub struct Pairing {
    id: i32,
    player_a: String,
    player_b: String,
    trial: i32,
    status: String,
    claimed_by: Option<String>,
    claimed_at: Option<NaiveDateTime>,
    attempts: i32,
    last_error: Option<String>,
    created_at: NaiveDateTime,
}

impl Pairing {
    /// Parses the stored status string.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the stored value is unknown.
    pub fn parse_status(&self) -> Result<PairingStatus, DbError> {
        PairingStatus::from_db_string(&self.status)
    }
}

/// Insertable pairing.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::pairings)]
pub struct NewPairing {
    player_a: String,
    player_b: String,
    trial: i32,
}

/// Kind of entry in the claim audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ClaimEventKind {
    /// First claim of a pending pairing.
    Claimed,
    /// Claim of a failed or abandoned pairing.
    Reclaimed,
    /// Claim released after an error.
    Released,
    /// Result committed.
    Completed,
}

/// Audit trail row for claim transitions.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::claim_events)]
pub struct ClaimEvent {
    id: i32,
    pairing_id: i32,
    worker_id: String,
    event: String,
    detail: Option<String>,
    at: NaiveDateTime,
}

/// Insertable claim event.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::claim_events)]
pub struct NewClaimEvent {
    pairing_id: i32,
    worker_id: String,
    event: String,
    detail: Option<String>,
}

impl NewClaimEvent {
    /// Creates an audit entry.
    pub fn new(pairing_id: i32, worker_id: &str, kind: ClaimEventKind, detail: Option<String>) -> Self {
        let event: &'static str = kind.into();
        Self {
            pairing_id,
            worker_id: worker_id.to_string(),
            event: event.to_string(),
            detail,
        }
    }
}

/// Stored transcript entry.
#[derive(Debug, Clone, Queryable, Selectable, Getters)]
#[diesel(table_name = schema::turn_log)]
pub struct TurnRow {
    id: i32,
    pairing_id: i32,
    attempt: i32,
    seq: i32,
    turn_number: i32,
    slot: String,
    action: Option<String>,
    verdict: String,
    spin: Option<i32>,
    before_a: i32,
    before_b: i32,
    after_a: i32,
    after_b: i32,
    recorded_at: NaiveDateTime,
}

fn square(value: i32) -> Result<u8, DbError> {
    u8::try_from(value)
        .map_err(|_| DbError::with_kind(DbErrorKind::Corrupt, format!("Invalid square: {}", value)))
}

impl TurnRow {
    /// Decodes the row back into a [`TurnRecord`].
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::Corrupt`] error if any column fails to decode.
    pub fn to_record(&self) -> Result<TurnRecord, DbError> {
        let slot = match self.slot.as_str() {
            "A" => Slot::A,
            "B" => Slot::B,
            other => {
                return Err(DbError::with_kind(
                    DbErrorKind::Corrupt,
                    format!("Invalid slot: '{}'", other),
                ));
            }
        };
        let action: Option<Action> = self.action.as_deref().map(serde_json::from_str).transpose()?;
        let verdict: Verdict = serde_json::from_str(&self.verdict)?;
        let turn = u32::try_from(self.turn_number).map_err(|_| {
            DbError::with_kind(DbErrorKind::Corrupt, format!("Invalid turn: {}", self.turn_number))
        })?;

        Ok(TurnRecord {
            turn,
            slot,
            action,
            verdict,
            spin: self.spin.map(square).transpose()?,
            before: Positions::new(square(self.before_a)?, square(self.before_b)?),
            after: Positions::new(square(self.after_a)?, square(self.after_b)?),
        })
    }
}

/// Insertable transcript entry.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::turn_log)]
pub struct NewTurnRow {
    pairing_id: i32,
    attempt: i32,
    seq: i32,
    turn_number: i32,
    slot: String,
    action: Option<String>,
    verdict: String,
    spin: Option<i32>,
    before_a: i32,
    before_b: i32,
    after_a: i32,
    after_b: i32,
}

impl NewTurnRow {
    /// Encodes one transcript entry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the action or verdict cannot be serialized.
    pub fn from_record(
        pairing_id: i32,
        attempt: i32,
        seq: i32,
        record: &TurnRecord,
    ) -> Result<Self, DbError> {
        Ok(Self {
            pairing_id,
            attempt,
            seq,
            turn_number: i32::try_from(record.turn)
                .map_err(|_| DbError::new(format!("Turn number overflow: {}", record.turn)))?,
            slot: record.slot.to_string(),
            action: record.action.as_ref().map(serde_json::to_string).transpose()?,
            verdict: serde_json::to_string(&record.verdict)?,
            spin: record.spin.map(i32::from),
            before_a: i32::from(record.before.a),
            before_b: i32::from(record.before.b),
            after_a: i32::from(record.after.a),
            after_b: i32::from(record.after.b),
        })
    }
}

/// Stored model call, keyed to the transcript entry it produced.
#[derive(Debug, Clone, Queryable, Selectable, Getters)]
#[diesel(table_name = schema::llm_invocations)]
pub struct InvocationRow {
    id: i32,
    turn_log_id: i32,
    call_index: i32,
    provider: String,
    model: String,
    request_messages: String,
    response_raw: Option<String>,
    tool_name: Option<String>,
    tool_arguments: Option<String>,
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
    latency_ms: i64,
    error: Option<String>,
    created_at: NaiveDateTime,
}

fn token_count(value: Option<i32>) -> Result<Option<u32>, DbError> {
    value
        .map(|count| {
            u32::try_from(count).map_err(|_| {
                DbError::with_kind(DbErrorKind::Corrupt, format!("Invalid token count: {}", count))
            })
        })
        .transpose()
}

impl InvocationRow {
    /// Decodes the row back into an [`LlmInvocation`].
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::Corrupt`] error if any column fails to decode.
    pub fn to_invocation(&self) -> Result<LlmInvocation, DbError> {
        let provider: LlmProvider = self.provider.parse().map_err(|_| {
            DbError::with_kind(
                DbErrorKind::Corrupt,
                format!("Invalid provider: '{}'", self.provider),
            )
        })?;
        let request: Value = serde_json::from_str(&self.request_messages)?;
        let response: Option<Value> =
            self.response_raw.as_deref().map(serde_json::from_str).transpose()?;
        let tool_call = match &self.tool_name {
            Some(name) => {
                let arguments: Value = match self.tool_arguments.as_deref() {
                    Some(text) => serde_json::from_str(text)?,
                    None => Value::Null,
                };
                Some(ToolCall::new(name.clone(), arguments))
            }
            None => None,
        };
        let usage = TokenUsage::new(token_count(self.input_tokens)?, token_count(self.output_tokens)?);
        let latency_ms = u64::try_from(self.latency_ms).map_err(|_| {
            DbError::with_kind(DbErrorKind::Corrupt, format!("Invalid latency: {}", self.latency_ms))
        })?;

        Ok(LlmInvocation::new(
            provider,
            self.model.clone(),
            request,
            response,
            tool_call,
            usage,
            latency_ms,
            self.error.clone(),
        ))
    }
}

/// Insertable model call.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::llm_invocations)]
pub(crate) struct NewInvocationRow {
    turn_log_id: i32,
    call_index: i32,
    provider: String,
    model: String,
    request_messages: String,
    response_raw: Option<String>,
    tool_name: Option<String>,
    tool_arguments: Option<String>,
    input_tokens: Option<i32>,
    output_tokens: Option<i32>,
    latency_ms: i64,
    error: Option<String>,
}

impl NewInvocationRow {
    /// Encodes call number `call_index` of transcript row `turn_log_id`.
    pub(crate) fn from_invocation(
        turn_log_id: i32,
        call_index: usize,
        invocation: &LlmInvocation,
    ) -> Result<Self, DbError> {
        let usage = invocation.usage();
        let tokens = |count: Option<u32>| count.map(|c| i32::try_from(c).unwrap_or(i32::MAX));
        Ok(Self {
            turn_log_id,
            call_index: i32::try_from(call_index)
                .map_err(|_| DbError::new(format!("Call index overflow: {}", call_index)))?,
            provider: invocation.provider().to_string(),
            model: invocation.model().clone(),
            request_messages: serde_json::to_string(invocation.request())?,
            response_raw: invocation.response().as_ref().map(serde_json::to_string).transpose()?,
            tool_name: invocation.tool_call().as_ref().map(|call| call.name().clone()),
            tool_arguments: invocation
                .tool_call()
                .as_ref()
                .map(|call| serde_json::to_string(call.arguments()))
                .transpose()?,
            input_tokens: tokens(usage.input_tokens),
            output_tokens: tokens(usage.output_tokens),
            latency_ms: i64::try_from(*invocation.latency_ms()).unwrap_or(i64::MAX),
            error: invocation.error().clone(),
        })
    }
}

/// Model call attached to its transcript position.
#[derive(Debug, Clone, PartialEq, Serialize, Getters)]
pub struct TurnInvocation {
    /// Sequence number of the transcript entry.
    seq: i32,
    /// Order among the calls made for that entry.
    call_index: i32,
    #[serde(flatten)]
    invocation: LlmInvocation,
}

impl TurnInvocation {
    pub(crate) fn new(seq: i32, call_index: i32, invocation: LlmInvocation) -> Self {
        Self {
            seq,
            call_index,
            invocation,
        }
    }
}

/// Committed match outcome, one per pairing.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters, Serialize)]
#[diesel(table_name = schema::matches)]
pub struct MatchRecord {
    id: i32,
    pairing_id: i32,
    attempt: i32,
    player_a: String,
    player_b: String,
    status: String,
    winner: Option<String>,
    turns: i32,
    seed: i64,
    started_at: NaiveDateTime,
    finished_at: NaiveDateTime,
}

impl MatchRecord {
    /// Parses the stored status code.
    ///
    /// # Errors
    ///
    /// Returns a [`DbErrorKind::Corrupt`] error if the code is unknown.
    pub fn parse_status(&self) -> Result<MatchStatus, DbError> {
        self.status
            .parse()
            .map_err(|e| DbError::with_kind(DbErrorKind::Corrupt, format!("{}", e)))
    }
}

/// Insertable match record.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::matches)]
pub(crate) struct NewMatchRecord {
    pub(crate) pairing_id: i32,
    pub(crate) attempt: i32,
    pub(crate) player_a: String,
    pub(crate) player_b: String,
    pub(crate) status: String,
    pub(crate) winner: Option<String>,
    pub(crate) turns: i32,
    pub(crate) seed: i64,
    pub(crate) started_at: NaiveDateTime,
    pub(crate) finished_at: NaiveDateTime,
}

/// What a worker hands to [`commit_result`](crate::MatchStore::commit_result).
#[derive(Debug, Clone, new, Getters)]
pub struct MatchSummary {
    status: MatchStatus,
    turns: u32,
    seed: u64,
    started_at: NaiveDateTime,
    finished_at: NaiveDateTime,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The record was written and the pairing completed.
    Committed,
    /// The pairing was already completed; nothing changed.
    AlreadyCompleted,
}

/// Rules for which pairings a worker may claim.
#[derive(Debug, Clone, Copy, new, Getters)]
pub struct ClaimPolicy {
    /// Claims older than this are treated as abandoned.
    liveness: Duration,
    /// Pairings claimed this many times are left alone.
    max_attempts: u32,
}

/// Pairing counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Getters, Serialize)]
pub struct RunProgress {
    total: usize,
    pending: usize,
    claimed: usize,
    completed: usize,
    failed: usize,
    retried: usize,
}

impl RunProgress {
    pub(crate) fn tally(rows: &[(String, i32)]) -> Result<Self, DbError> {
        let mut progress = Self::default();
        for (status, attempts) in rows {
            progress.total += 1;
            match PairingStatus::from_db_string(status)? {
                PairingStatus::Pending => progress.pending += 1,
                PairingStatus::Claimed => progress.claimed += 1,
                PairingStatus::Completed => progress.completed += 1,
                PairingStatus::Failed => progress.failed += 1,
            }
            if *attempts > 1 {
                progress.retried += 1;
            }
        }
        Ok(progress)
    }

    /// True once every pairing is completed.
    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

impl std::fmt::Display for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} completed, {} pending, {} claimed, {} failed, {} retried",
            self.completed, self.total, self.pending, self.claimed, self.failed, self.retried
        )
    }
}

/// A committed match with its transcript, as exported for rating.
#[derive(Debug, Clone, Serialize, Getters)]
pub struct MatchExport {
    #[serde(flatten)]
    record: MatchRecord,
    transcript: Vec<TurnRecord>,
    /// Model calls behind the transcript, in transcript order.
    invocations: Vec<TurnInvocation>,
}

impl MatchExport {
    pub(crate) fn new(
        record: MatchRecord,
        transcript: Vec<TurnRecord>,
        invocations: Vec<TurnInvocation>,
    ) -> Self {
        Self {
            record,
            transcript,
            invocations,
        }
    }
}
