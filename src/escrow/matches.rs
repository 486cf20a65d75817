//! Match Rows
//! Mission: Persist match snapshots; only the state machine writes through here

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::{opt_uuid_column, uuid_column};
use crate::error::{EngineError, EngineResult};
use crate::models::{Match, MatchStatus, PlatformStats};

const MATCH_COLUMNS: &str = "id, game, entry_fee_cents, status, created_by_id, joined_by_id, \
     winner_id, prize_cents, commission_cents, created_at, updated_at";

pub const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

pub struct MatchRows<'c> {
    conn: &'c Connection,
}

impl<'c> MatchRows<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, game: &str, entry_fee_cents: i64, created_by_id: Uuid) -> EngineResult<Match> {
        let now = Utc::now().to_rfc3339();
        let m = Match {
            id: Uuid::new_v4(),
            game: game.to_string(),
            entry_fee_cents,
            status: MatchStatus::Waiting,
            created_by_id,
            joined_by_id: None,
            winner_id: None,
            prize_cents: None,
            commission_cents: None,
            created_at: now.clone(),
            updated_at: now,
        };

        self.conn.execute(
            "INSERT INTO matches (id, game, entry_fee_cents, status, created_by_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                m.id.to_string(),
                &m.game,
                m.entry_fee_cents,
                m.status.as_str(),
                m.created_by_id.to_string(),
                &m.created_at,
                &m.updated_at,
            ],
        )?;
        Ok(m)
    }

    pub fn find(&self, match_id: Uuid) -> EngineResult<Option<Match>> {
        let m = self
            .conn
            .query_row(
                &format!("SELECT {MATCH_COLUMNS} FROM matches WHERE id = ?1"),
                params![match_id.to_string()],
                match_from_row,
            )
            .optional()?;
        Ok(m)
    }

    pub fn require(&self, match_id: Uuid) -> EngineResult<Match> {
        self.find(match_id)?
            .ok_or_else(|| EngineError::not_found("match", match_id))
    }

    /// Take the second seat. Conditional on the row still being WAITING with an empty
    /// seat, so a writer that slipped past the engine's checks changes nothing.
    pub fn mark_joined(&self, match_id: Uuid, joined_by_id: Uuid) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE matches SET joined_by_id = ?1, status = 'IN_PROGRESS', updated_at = ?2
             WHERE id = ?3 AND status = 'WAITING' AND joined_by_id IS NULL",
            params![
                joined_by_id.to_string(),
                Utc::now().to_rfc3339(),
                match_id.to_string()
            ],
        )?;
        expect_one_row(changed)
    }

    pub fn mark_disputed(&self, match_id: Uuid) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE matches SET status = 'DISPUTE', updated_at = ?1
             WHERE id = ?2 AND status = 'IN_PROGRESS'",
            params![Utc::now().to_rfc3339(), match_id.to_string()],
        )?;
        expect_one_row(changed)
    }

    /// Record the settlement. Only fires from `from` and only if no winner is set yet.
    pub fn mark_finished(
        &self,
        match_id: Uuid,
        from: MatchStatus,
        winner_id: Uuid,
        prize_cents: i64,
        commission_cents: i64,
    ) -> EngineResult<()> {
        let changed = self.conn.execute(
            "UPDATE matches SET status = 'FINISHED', winner_id = ?1, prize_cents = ?2,
                commission_cents = ?3, updated_at = ?4
             WHERE id = ?5 AND status = ?6 AND winner_id IS NULL",
            params![
                winner_id.to_string(),
                prize_cents,
                commission_cents,
                Utc::now().to_rfc3339(),
                match_id.to_string(),
                from.as_str(),
            ],
        )?;
        expect_one_row(changed)
    }

    /// Newest first; `limit` is clamped to 1..=500
    pub fn list(&self, limit: usize) -> EngineResult<Vec<Match>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT) as i64;
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let matches = stmt
            .query_map(params![limit], match_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(matches)
    }

    pub fn stats(&self) -> EngineResult<PlatformStats> {
        let stats = self.conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'FINISHED' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'FINISHED' THEN entry_fee_cents ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'FINISHED' THEN commission_cents ELSE 0 END), 0)
             FROM matches",
            [],
            |row| {
                let finished_fees: i64 = row.get(2)?;
                // Both seats paid on every finished match
                let total_volume_cents = finished_fees
                    .checked_mul(2)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(2, finished_fees))?;
                Ok(PlatformStats {
                    total_matches: row.get(0)?,
                    finished_matches: row.get(1)?,
                    total_volume_cents,
                    total_commission_cents: row.get(3)?,
                })
            },
        )?;
        Ok(stats)
    }
}

/// A conditional write that misses means the row no longer holds the state the engine
/// validated against
fn expect_one_row(changed: usize) -> EngineResult<()> {
    if changed == 1 {
        Ok(())
    } else {
        Err(EngineError::TransientConflict)
    }
}

fn match_from_row(row: &Row<'_>) -> rusqlite::Result<Match> {
    let status_str: String = row.get(3)?;
    let status = MatchStatus::from_str(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown match status {status_str}").into(),
        )
    })?;

    Ok(Match {
        id: uuid_column(row, 0)?,
        game: row.get(1)?,
        entry_fee_cents: row.get(2)?,
        status,
        created_by_id: uuid_column(row, 4)?,
        joined_by_id: opt_uuid_column(row, 5)?,
        winner_id: opt_uuid_column(row, 6)?,
        prize_cents: row.get(7)?,
        commission_cents: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
