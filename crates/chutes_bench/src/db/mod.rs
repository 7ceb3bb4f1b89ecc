//! Persistent store: pairing queue, claim audit trail, transcripts and
//! committed match records.

mod error;
mod models;
mod repository;
mod schema; // Diesel generated schema - internal use only

pub use error::{DbError, DbErrorKind};
pub use models::{
    ClaimEvent, ClaimEventKind, ClaimPolicy, CommitOutcome, InvocationRow, MatchExport,
    MatchRecord, MatchSummary, NewPairing, NewTurnRow, Pairing, PairingStatus, RunProgress,
    TurnInvocation, TurnRow,
};
pub(crate) use models::{NewClaimEvent, NewInvocationRow, NewMatchRecord};
pub use repository::MatchStore;
