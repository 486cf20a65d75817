//! Settlement Calculator
//!
//! Splits the pooled stake of a two-seat match into prize and platform commission.
//! Integer cents only; the commission is floored so the prize absorbs any remainder.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::models::MAX_COMMISSION_BPS;

const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub total_stake_cents: i64,
    pub prize_cents: i64,
    pub commission_cents: i64,
}

/// `total = fee * 2`, `commission = floor(total * bps / 10000)`, `prize = total - commission`
pub fn settle(entry_fee_cents: i64, commission_bps: u32) -> EngineResult<Settlement> {
    if entry_fee_cents < 0 {
        return Err(EngineError::invalid_argument(format!(
            "entry fee must be non-negative, got {entry_fee_cents}"
        )));
    }
    if commission_bps > MAX_COMMISSION_BPS {
        return Err(EngineError::invalid_argument(format!(
            "commission_bps must be within 0..={MAX_COMMISSION_BPS}, got {commission_bps}"
        )));
    }

    let total_stake_cents = entry_fee_cents
        .checked_mul(2)
        .ok_or_else(|| EngineError::invalid_argument("entry fee overflows total stake"))?;

    // Widened so total * bps cannot overflow; result is <= total, so it fits back in i64
    let commission_cents =
        (i128::from(total_stake_cents) * i128::from(commission_bps) / BPS_DENOMINATOR) as i64;

    Ok(Settlement {
        total_stake_cents,
        prize_cents: total_stake_cents - commission_cents,
        commission_cents,
    })
}
