//! Database error types.

use derive_more::{Display, Error};
use tracing::instrument;

/// Broad classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DbErrorKind {
    /// SQLite lock contention; safe to retry.
    #[display("busy")]
    Busy,
    /// The caller no longer holds the claim it is acting on.
    #[display("claim lost")]
    ClaimLost,
    /// A referenced row does not exist.
    #[display("not found")]
    NotFound,
    /// A stored value could not be decoded.
    #[display("corrupt")]
    Corrupt,
    /// Anything else.
    #[display("other")]
    Other,
}

/// Database error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Database error ({}): {} at {}:{}", kind, message, file, line)]
pub struct DbError {
    /// Error classification.
    pub kind: DbErrorKind,
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl DbError {
    /// Creates a new database error with caller location tracking.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(DbErrorKind::Other, message)
    }

    /// Creates a classified error with caller location tracking.
    #[track_caller]
    pub fn with_kind(kind: DbErrorKind, message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            kind,
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }

    /// True when the operation failed on lock contention.
    pub fn is_busy(&self) -> bool {
        self.kind == DbErrorKind::Busy
    }
}

impl From<diesel::result::Error> for DbError {
    #[track_caller]
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::Error as E;
        let kind = match &err {
            E::NotFound => DbErrorKind::NotFound,
            E::DeserializationError(_) => DbErrorKind::Corrupt,
            E::DatabaseError(_, info)
                if info.message().contains("locked") || info.message().contains("busy") =>
            {
                DbErrorKind::Busy
            }
            _ => DbErrorKind::Other,
        };
        Self::with_kind(kind, format!("Diesel error: {}", err))
    }
}

impl From<diesel::ConnectionError> for DbError {
    #[track_caller]
    fn from(err: diesel::ConnectionError) -> Self {
        Self::new(format!("Connection error: {}", err))
    }
}

impl From<serde_json::Error> for DbError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::with_kind(DbErrorKind::Corrupt, format!("JSON error: {}", err))
    }
}
