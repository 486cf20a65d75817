//! Escrow Data Models
//! Mission: Define the match, ledger and platform config records shared by the engine

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use crate::auth::models::{User, UserRole};

/// Default entry fee when no platform config row has been persisted
pub const DEFAULT_ENTRY_FEE_CENTS: i64 = 500;
/// Default commission (5%) when no platform config row has been persisted
pub const DEFAULT_COMMISSION_BPS: u32 = 500;
/// 100% in basis points
pub const MAX_COMMISSION_BPS: u32 = 10_000;

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Waiting,
    InProgress,
    Dispute,
    Finished,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Waiting => "WAITING",
            MatchStatus::InProgress => "IN_PROGRESS",
            MatchStatus::Dispute => "DISPUTE",
            MatchStatus::Finished => "FINISHED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(MatchStatus::Waiting),
            "IN_PROGRESS" => Some(MatchStatus::InProgress),
            "DISPUTE" => Some(MatchStatus::Dispute),
            "FINISHED" => Some(MatchStatus::Finished),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MatchStatus::Finished)
    }

    /// Edges of the lifecycle graph. Status never moves backwards.
    pub fn can_advance_to(&self, next: MatchStatus) -> bool {
        matches!(
            (self, next),
            (MatchStatus::Waiting, MatchStatus::InProgress)
                | (MatchStatus::InProgress, MatchStatus::Finished)
                | (MatchStatus::InProgress, MatchStatus::Dispute)
                | (MatchStatus::Dispute, MatchStatus::Finished)
        )
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match snapshot handed to presentation layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: Uuid,
    pub game: String,
    pub entry_fee_cents: i64,
    pub status: MatchStatus,
    pub created_by_id: Uuid,
    pub joined_by_id: Option<Uuid>,
    pub winner_id: Option<Uuid>,
    pub prize_cents: Option<i64>,
    pub commission_cents: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

impl Match {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.created_by_id == user_id || self.joined_by_id == Some(user_id)
    }

    /// The other participant, if both seats are taken and `user_id` holds one of them.
    pub fn opponent_of(&self, user_id: Uuid) -> Option<Uuid> {
        let joined = self.joined_by_id?;
        if user_id == self.created_by_id {
            Some(joined)
        } else if user_id == joined {
            Some(self.created_by_id)
        } else {
            None
        }
    }

    /// Number of participants who have escrowed the entry fee
    pub fn paid_seats(&self) -> i64 {
        if self.entry_fee_cents == 0 {
            return 0;
        }
        1 + i64::from(self.joined_by_id.is_some())
    }
}

/// Ledger entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    EntryFee,
    WinPayout,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::EntryFee => "ENTRY_FEE",
            LedgerEntryType::WinPayout => "WIN_PAYOUT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ENTRY_FEE" => Some(LedgerEntryType::EntryFee),
            "WIN_PAYOUT" => Some(LedgerEntryType::WinPayout),
            _ => None,
        }
    }
}

/// Immutable record of one balance-affecting event.
/// `amount_cents` is negative for deductions, positive for payouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub user_id: Uuid,
    pub match_id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: LedgerEntryType,
    pub amount_cents: i64,
    pub created_at: String,
}

/// Entry to be appended; id and timestamp are assigned by the store
#[derive(Debug, Clone, Copy)]
pub struct NewLedgerEntry {
    pub user_id: Uuid,
    pub match_id: Uuid,
    pub entry_type: LedgerEntryType,
    pub amount_cents: i64,
}

impl NewLedgerEntry {
    pub fn entry_fee(user_id: Uuid, match_id: Uuid, fee_cents: i64) -> Self {
        Self {
            user_id,
            match_id,
            entry_type: LedgerEntryType::EntryFee,
            amount_cents: -fee_cents,
        }
    }

    pub fn win_payout(user_id: Uuid, match_id: Uuid, prize_cents: i64) -> Self {
        Self {
            user_id,
            match_id,
            entry_type: LedgerEntryType::WinPayout,
            amount_cents: prize_cents,
        }
    }
}

/// Platform-wide settings (singleton)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    pub default_entry_fee_cents: i64,
    pub commission_bps: u32,
    pub updated_at: Option<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            default_entry_fee_cents: DEFAULT_ENTRY_FEE_CENTS,
            commission_bps: DEFAULT_COMMISSION_BPS,
            updated_at: None,
        }
    }
}

/// Aggregate counters across all matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStats {
    pub total_matches: i64,
    pub finished_matches: i64,
    pub total_volume_cents: i64,
    pub total_commission_cents: i64,
}
