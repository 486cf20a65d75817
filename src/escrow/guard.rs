//! Idempotency Guard
//!
//! Money-moving transitions look at the freshly loaded status before anything else and
//! short-circuit when their effect is already in place, so a retried call or a double
//! click replays the stored result instead of paying out twice.

use crate::models::{Match, MatchStatus};

/// What a transition did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Side effects were applied and committed
    Applied(Match),
    /// Target state was already reached; nothing was written
    Replayed(Match),
}

impl TransitionOutcome {
    pub fn is_replay(&self) -> bool {
        matches!(self, TransitionOutcome::Replayed(_))
    }

    pub fn into_match(self) -> Match {
        match self {
            TransitionOutcome::Applied(m) | TransitionOutcome::Replayed(m) => m,
        }
    }
}

/// First check of finish/resolve: a FINISHED match replays as-is, whatever winner the
/// caller named this time.
pub fn settlement_replay(current: &Match) -> Option<TransitionOutcome> {
    (current.status == MatchStatus::Finished).then(|| TransitionOutcome::Replayed(current.clone()))
}

/// A match already under dispute replays as-is
pub fn dispute_replay(current: &Match) -> Option<TransitionOutcome> {
    (current.status == MatchStatus::Dispute).then(|| TransitionOutcome::Replayed(current.clone()))
}
