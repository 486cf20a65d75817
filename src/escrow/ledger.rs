//! Ledger Store
//! Mission: Append-only record of every balance mutation, keyed by user and match

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::EngineResult;
use crate::models::{LedgerEntry, LedgerEntryType, NewLedgerEntry};

const ENTRY_COLUMNS: &str = "id, user_id, match_id, type, amount_cents, created_at";

/// Ledger view over a connection or an open atomic unit.
/// Append and read only; storage triggers reject UPDATE and DELETE.
pub struct Ledger<'c> {
    conn: &'c Connection,
}

impl<'c> Ledger<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Insert one immutable record and return it
    pub fn append(&self, entry: NewLedgerEntry) -> EngineResult<LedgerEntry> {
        let created_at = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO ledger_entries (user_id, match_id, type, amount_cents, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.user_id.to_string(),
                entry.match_id.to_string(),
                entry.entry_type.as_str(),
                entry.amount_cents,
                &created_at,
            ],
        )?;

        Ok(LedgerEntry {
            id: self.conn.last_insert_rowid(),
            user_id: entry.user_id,
            match_id: entry.match_id,
            entry_type: entry.entry_type,
            amount_cents: entry.amount_cents,
            created_at,
        })
    }

    /// Signed sum of all entries of `entry_type` for a match (0 when none)
    pub fn sum_by_match(&self, match_id: Uuid, entry_type: LedgerEntryType) -> EngineResult<i64> {
        let sum: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM ledger_entries
             WHERE match_id = ?1 AND type = ?2",
            params![match_id.to_string(), entry_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(sum)
    }

    pub fn count_by_match(&self, match_id: Uuid, entry_type: LedgerEntryType) -> EngineResult<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_entries WHERE match_id = ?1 AND type = ?2",
            params![match_id.to_string(), entry_type.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Entries for one match in insertion order
    pub fn entries_for_match(&self, match_id: Uuid) -> EngineResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE match_id = ?1 ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map(params![match_id.to_string()], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Entries for one user in insertion order
    pub fn entries_for_user(&self, user_id: Uuid) -> EngineResult<Vec<LedgerEntry>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE user_id = ?1 ORDER BY id ASC"
        ))?;
        let entries = stmt
            .query_map(params![user_id.to_string()], entry_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let type_str: String = row.get(3)?;
    let entry_type = LedgerEntryType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown ledger entry type {type_str}").into(),
        )
    })?;

    Ok(LedgerEntry {
        id: row.get(0)?,
        user_id: uuid_column(row, 1)?,
        match_id: uuid_column(row, 2)?,
        entry_type,
        amount_cents: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};
    use crate::error::EngineError;
    use tempfile::NamedTempFile;

    fn setup() -> (Database, NamedTempFile, Uuid, Uuid) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap(), DatabaseOptions::default())
            .unwrap();
        let user_id = Uuid::new_v4();
        let match_id = Uuid::new_v4();
        db.atomic(|tx| {
            tx.execute(
                "INSERT INTO users (id, username, created_at) VALUES (?1, 'alice', 'now')",
                params![user_id.to_string()],
            )?;
            tx.execute(
                "INSERT INTO matches (id, game, entry_fee_cents, created_by_id, created_at, updated_at)
                 VALUES (?1, 'chess', 500, ?2, 'now', 'now')",
                params![match_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();
        (db, temp_file, user_id, match_id)
    }

    #[test]
    fn test_append_and_sum() {
        let (db, _temp, user_id, match_id) = setup();

        let entry = db
            .atomic(|tx| Ledger::new(tx).append(NewLedgerEntry::entry_fee(user_id, match_id, 500)))
            .unwrap();
        assert_eq!(entry.amount_cents, -500);
        assert_eq!(entry.entry_type, LedgerEntryType::EntryFee);

        db.read(|conn| {
            let ledger = Ledger::new(conn);
            assert_eq!(ledger.sum_by_match(match_id, LedgerEntryType::EntryFee)?, -500);
            assert_eq!(ledger.sum_by_match(match_id, LedgerEntryType::WinPayout)?, 0);
            assert_eq!(ledger.entries_for_user(user_id)?.len(), 1);
            assert_eq!(ledger.entries_for_match(match_id)?[0], entry);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_entries_are_immutable() {
        let (db, _temp, user_id, match_id) = setup();
        db.atomic(|tx| Ledger::new(tx).append(NewLedgerEntry::entry_fee(user_id, match_id, 500)))
            .unwrap();

        let update = db.atomic(|tx| Ok(tx.execute("UPDATE ledger_entries SET amount_cents = 0", [])?));
        assert!(matches!(update, Err(EngineError::Storage(_))));

        let delete = db.atomic(|tx| Ok(tx.execute("DELETE FROM ledger_entries", [])?));
        assert!(matches!(delete, Err(EngineError::Storage(_))));

        let sum = db
            .read(|conn| Ledger::new(conn).sum_by_match(match_id, LedgerEntryType::EntryFee))
            .unwrap();
        assert_eq!(sum, -500);
    }

    #[test]
    fn test_single_payout_per_match() {
        let (db, _temp, user_id, match_id) = setup();
        db.atomic(|tx| Ledger::new(tx).append(NewLedgerEntry::win_payout(user_id, match_id, 950)))
            .unwrap();

        let second =
            db.atomic(|tx| Ledger::new(tx).append(NewLedgerEntry::win_payout(user_id, match_id, 950)));
        assert!(matches!(second, Err(EngineError::Storage(_))));

        let count = db
            .read(|conn| Ledger::new(conn).count_by_match(match_id, LedgerEntryType::WinPayout))
            .unwrap();
        assert_eq!(count, 1);
    }
}
