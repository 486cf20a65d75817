//! Match Audit
//! Mission: Cross-check a match snapshot against its ledger rows
//!
//! Read-only. Reports every violated money invariant instead of stopping at the first.

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use crate::error::EngineResult;
use crate::escrow::ledger::Ledger;
use crate::escrow::matches::MatchRows;
use crate::models::{LedgerEntryType, Match, MatchStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub match_id: Uuid,
    pub status: MatchStatus,
    pub consistent: bool,
    pub violations: Vec<String>,
}

pub fn audit_match(conn: &Connection, match_id: Uuid) -> EngineResult<AuditReport> {
    let current = MatchRows::new(conn).require(match_id)?;
    let ledger = Ledger::new(conn);
    let entries = ledger.entries_for_match(match_id)?;

    let mut violations = Vec::new();
    check_seats(&current, &mut violations);

    let fees: Vec<_> = entries
        .iter()
        .filter(|e| e.entry_type == LedgerEntryType::EntryFee)
        .collect();
    let payouts: Vec<_> = entries
        .iter()
        .filter(|e| e.entry_type == LedgerEntryType::WinPayout)
        .collect();

    let expected_fees = current.paid_seats();
    if fees.len() as i64 != expected_fees {
        violations.push(format!(
            "expected {expected_fees} ENTRY_FEE entries, found {}",
            fees.len()
        ));
    }
    let fee_sum = ledger.sum_by_match(match_id, LedgerEntryType::EntryFee)?;
    if fee_sum != -current.entry_fee_cents * expected_fees {
        violations.push(format!(
            "ENTRY_FEE sum {fee_sum} != -{} x {expected_fees}",
            current.entry_fee_cents
        ));
    }
    for fee in &fees {
        if fee.amount_cents != -current.entry_fee_cents {
            violations.push(format!(
                "ENTRY_FEE entry {} amount {} != -{}",
                fee.id, fee.amount_cents, current.entry_fee_cents
            ));
        }
        if !current.is_participant(fee.user_id) {
            violations.push(format!("ENTRY_FEE entry {} charged a non-participant", fee.id));
        }
    }

    if current.status == MatchStatus::Finished {
        check_settlement(&current, &payouts, &mut violations);
    } else {
        if !payouts.is_empty() {
            violations.push(format!(
                "{} WIN_PAYOUT entries on a {} match",
                payouts.len(),
                current.status
            ));
        }
        if current.winner_id.is_some()
            || current.prize_cents.is_some()
            || current.commission_cents.is_some()
        {
            violations.push(format!("settlement fields set on a {} match", current.status));
        }
    }

    Ok(AuditReport {
        match_id,
        status: current.status,
        consistent: violations.is_empty(),
        violations,
    })
}

fn check_seats(current: &Match, violations: &mut Vec<String>) {
    match (current.status, current.joined_by_id) {
        (MatchStatus::Waiting, Some(_)) => {
            violations.push("WAITING match has a joined participant".to_string())
        }
        (MatchStatus::Waiting, None) => {}
        (status, None) => violations.push(format!("{status} match has no joined participant")),
        (_, Some(joined)) if joined == current.created_by_id => {
            violations.push("creator holds both seats".to_string())
        }
        _ => {}
    }
}

fn check_settlement(
    current: &Match,
    payouts: &[&crate::models::LedgerEntry],
    violations: &mut Vec<String>,
) {
    let (Some(winner), Some(prize), Some(commission)) = (
        current.winner_id,
        current.prize_cents,
        current.commission_cents,
    ) else {
        violations.push("FINISHED match is missing winner, prize or commission".to_string());
        return;
    };

    if !current.is_participant(winner) {
        violations.push("winner is not a participant".to_string());
    }
    if prize + commission != current.entry_fee_cents * 2 {
        violations.push(format!(
            "prize {prize} + commission {commission} != total stake {}",
            current.entry_fee_cents * 2
        ));
    }

    match payouts {
        [payout] => {
            if payout.user_id != winner {
                violations.push("WIN_PAYOUT credited someone other than the winner".to_string());
            }
            if payout.amount_cents != prize {
                violations.push(format!(
                    "WIN_PAYOUT amount {} != prize {prize}",
                    payout.amount_cents
                ));
            }
        }
        _ => violations.push(format!(
            "expected exactly 1 WIN_PAYOUT entry, found {}",
            payouts.len()
        )),
    }
}
