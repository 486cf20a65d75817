//! Engine Error Taxonomy
//!
//! Closed set of failure kinds surfaced by the escrow engine. Presentation layers
//! match on the variant, never on the rendered message.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::models::MatchStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("cannot {action} a match in status {status}")]
    InvalidTransition {
        action: &'static str,
        status: MatchStatus,
    },

    #[error("cannot join your own match")]
    SelfJoinForbidden,

    #[error("match already has a participant")]
    AlreadyJoined,

    #[error("winner must be a participant")]
    InvalidWinner,

    #[error("insufficient balance: required {required_cents}, available {available_cents}")]
    InsufficientFunds {
        required_cents: i64,
        available_cents: i64,
    },

    #[error("forbidden: {reason}")]
    Forbidden { reason: &'static str },

    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("transaction lost a concurrency race, retry the call")]
    TransientConflict,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        EngineError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Stable identifier for transport mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "NotFound",
            EngineError::InvalidTransition { .. } => "InvalidTransition",
            EngineError::SelfJoinForbidden => "SelfJoinForbidden",
            EngineError::AlreadyJoined => "AlreadyJoined",
            EngineError::InvalidWinner => "InvalidWinner",
            EngineError::InsufficientFunds { .. } => "InsufficientFunds",
            EngineError::Forbidden { .. } => "Forbidden",
            EngineError::InvalidArgument { .. } => "InvalidArgument",
            EngineError::TransientConflict => "TransientConflict",
            EngineError::Storage(_) => "Storage",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientConflict)
    }

    /// SQLite lock contention, as opposed to a genuine storage failure.
    ///
    /// A conditional write that missed under the write lock is not contention: rerunning
    /// the unit reads the same state, so it surfaces straight away.
    pub(crate) fn is_lock_contention(&self) -> bool {
        match self {
            EngineError::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
