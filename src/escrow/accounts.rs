//! Account Balance Ops
//! Mission: Move money in and out of user balances without ever going negative
//!
//! Every operation here is a single conditional UPDATE, and is meant to run inside
//! the same atomic unit as the ledger append and match update that accompany it.

use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::db::uuid_column;
use crate::error::{EngineError, EngineResult};
use crate::models::{User, UserRole};

pub(crate) const USER_COLUMNS: &str =
    "id, username, role, balance_cents, wins, losses, created_at";

pub struct Accounts<'c> {
    conn: &'c Connection,
}

impl<'c> Accounts<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn find(&self, user_id: Uuid) -> EngineResult<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![user_id.to_string()],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn require(&self, user_id: Uuid) -> EngineResult<User> {
        self.find(user_id)?
            .ok_or_else(|| EngineError::not_found("user", user_id))
    }

    pub fn balance_of(&self, user_id: Uuid) -> EngineResult<i64> {
        let balance: Option<i64> = self
            .conn
            .query_row(
                "SELECT balance_cents FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        balance.ok_or_else(|| EngineError::not_found("user", user_id))
    }

    /// Decrement a balance. Fails with `InsufficientFunds` (and changes nothing) when
    /// the balance is below `amount_cents`. Returns the new balance.
    pub fn debit(&self, user_id: Uuid, amount_cents: i64) -> EngineResult<i64> {
        ensure_non_negative(amount_cents)?;

        let changed = self.conn.execute(
            "UPDATE users SET balance_cents = balance_cents - ?1
             WHERE id = ?2 AND balance_cents >= ?1",
            params![amount_cents, user_id.to_string()],
        )?;

        if changed == 0 {
            let available_cents = self.balance_of(user_id)?;
            return Err(EngineError::InsufficientFunds {
                required_cents: amount_cents,
                available_cents,
            });
        }

        self.balance_of(user_id)
    }

    /// Increment a balance. Returns the new balance.
    pub fn credit(&self, user_id: Uuid, amount_cents: i64) -> EngineResult<i64> {
        ensure_non_negative(amount_cents)?;

        // SQLite turns integer overflow into REAL, so bound the sum here
        let changed = self.conn.execute(
            "UPDATE users SET balance_cents = balance_cents + ?1
             WHERE id = ?2 AND balance_cents <= ?3 - ?1",
            params![amount_cents, user_id.to_string(), i64::MAX],
        )?;
        if changed == 0 {
            let balance = self.balance_of(user_id)?;
            return Err(EngineError::invalid_argument(format!(
                "credit of {amount_cents} overflows balance {balance}"
            )));
        }

        self.balance_of(user_id)
    }

    pub fn increment_wins(&self, user_id: Uuid) -> EngineResult<()> {
        self.bump_counter("wins", user_id)
    }

    pub fn increment_losses(&self, user_id: Uuid) -> EngineResult<()> {
        self.bump_counter("losses", user_id)
    }

    fn bump_counter(&self, column: &'static str, user_id: Uuid) -> EngineResult<()> {
        let changed = self.conn.execute(
            &format!("UPDATE users SET {column} = {column} + 1 WHERE id = ?1"),
            params![user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found("user", user_id));
        }
        Ok(())
    }
}

fn ensure_non_negative(amount_cents: i64) -> EngineResult<()> {
    if amount_cents < 0 {
        return Err(EngineError::invalid_argument(format!(
            "amount must be non-negative, got {amount_cents}"
        )));
    }
    Ok(())
}

pub(crate) fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(2)?;
    let role = UserRole::from_str(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown user role {role_str}").into(),
        )
    })?;
    Ok(User {
        id: uuid_column(row, 0)?,
        username: row.get(1)?,
        role,
        balance_cents: row.get(3)?,
        wins: row.get(4)?,
        losses: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DatabaseOptions};
    use tempfile::NamedTempFile;

    fn setup(balance: i64) -> (Database, NamedTempFile, Uuid) {
        let temp_file = NamedTempFile::new().unwrap();
        let db = Database::open(temp_file.path().to_str().unwrap(), DatabaseOptions::default())
            .unwrap();
        let user_id = Uuid::new_v4();
        db.atomic(|tx| {
            tx.execute(
                "INSERT INTO users (id, username, balance_cents, created_at)
                 VALUES (?1, 'alice', ?2, 'now')",
                params![user_id.to_string(), balance],
            )?;
            Ok(())
        })
        .unwrap();
        (db, temp_file, user_id)
    }

    #[test]
    fn test_debit_and_credit() {
        let (db, _temp, user_id) = setup(1000);

        let after_debit = db.atomic(|tx| Accounts::new(tx).debit(user_id, 400)).unwrap();
        assert_eq!(after_debit, 600);

        let after_credit = db.atomic(|tx| Accounts::new(tx).credit(user_id, 950)).unwrap();
        assert_eq!(after_credit, 1550);
    }

    #[test]
    fn test_debit_exact_balance_reaches_zero() {
        let (db, _temp, user_id) = setup(500);
        let balance = db.atomic(|tx| Accounts::new(tx).debit(user_id, 500)).unwrap();
        assert_eq!(balance, 0);
    }

    #[test]
    fn test_insufficient_funds_changes_nothing() {
        let (db, _temp, user_id) = setup(300);

        let result = db.atomic(|tx| Accounts::new(tx).debit(user_id, 500));
        match result {
            Err(EngineError::InsufficientFunds {
                required_cents,
                available_cents,
            }) => {
                assert_eq!(required_cents, 500);
                assert_eq!(available_cents, 300);
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }

        let balance = db.read(|conn| Accounts::new(conn).balance_of(user_id)).unwrap();
        assert_eq!(balance, 300);
    }

    #[test]
    fn test_negative_amounts_rejected() {
        let (db, _temp, user_id) = setup(300);
        assert!(matches!(
            db.atomic(|tx| Accounts::new(tx).debit(user_id, -1)),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            db.atomic(|tx| Accounts::new(tx).credit(user_id, -1)),
            Err(EngineError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_unknown_user() {
        let (db, _temp, _user_id) = setup(0);
        let ghost = Uuid::new_v4();
        assert!(matches!(
            db.atomic(|tx| Accounts::new(tx).debit(ghost, 1)),
            Err(EngineError::NotFound { entity: "user", .. })
        ));
        assert!(matches!(
            db.atomic(|tx| Accounts::new(tx).increment_wins(ghost)),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_credit_cannot_overflow_balance() {
        let (db, _temp, user_id) = setup(i64::MAX - 10);

        let result = db.atomic(|tx| Accounts::new(tx).credit(user_id, 11));
        assert!(matches!(result, Err(EngineError::InvalidArgument { .. })));

        let balance = db.atomic(|tx| Accounts::new(tx).credit(user_id, 10)).unwrap();
        assert_eq!(balance, i64::MAX);
    }

    #[test]
    fn test_unknown_role_fails_row_conversion() {
        let (db, _temp, user_id) = setup(0);
        db.atomic(|tx| {
            tx.execute(
                "UPDATE users SET role = 'WIZARD' WHERE id = ?1",
                params![user_id.to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let result = db.read(|conn| Accounts::new(conn).require(user_id));
        assert!(matches!(
            result,
            Err(EngineError::Storage(rusqlite::Error::FromSqlConversionFailure(2, _, _)))
        ));
    }

    #[test]
    fn test_win_loss_counters() {
        let (db, _temp, user_id) = setup(0);
        db.atomic(|tx| {
            let accounts = Accounts::new(tx);
            accounts.increment_wins(user_id)?;
            accounts.increment_wins(user_id)?;
            accounts.increment_losses(user_id)
        })
        .unwrap();

        let user = db.read(|conn| Accounts::new(conn).require(user_id)).unwrap();
        assert_eq!(user.wins, 2);
        assert_eq!(user.losses, 1);
    }
}
