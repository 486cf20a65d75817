//! User Storage
//! Mission: Register accounts and administer roles on the shared escrow database

use chrono::Utc;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::auth::access::require_super_admin;
use crate::auth::models::{User, UserRole};
use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::escrow::accounts::{user_from_row, Accounts, USER_COLUMNS};

/// User registry backed by the escrow database
pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a new user with a starting balance
    pub fn create_user(
        &self,
        username: &str,
        role: UserRole,
        initial_balance_cents: i64,
    ) -> EngineResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(EngineError::invalid_argument("username must not be empty"));
        }
        if initial_balance_cents < 0 {
            return Err(EngineError::invalid_argument(format!(
                "initial balance must be non-negative, got {initial_balance_cents}"
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            role,
            balance_cents: initial_balance_cents,
            wins: 0,
            losses: 0,
            created_at: Utc::now().to_rfc3339(),
        };

        self.db.atomic(|tx| {
            let inserted = tx.execute(
                "INSERT INTO users (id, username, role, balance_cents, wins, losses, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, 0, ?5)",
                params![
                    user.id.to_string(),
                    &user.username,
                    user.role.as_str(),
                    user.balance_cents,
                    &user.created_at,
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(EngineError::invalid_argument(format!(
                        "username '{}' is already taken",
                        user.username
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })?;

        info!(
            "✅ Created user: {} ({}, balance {} cents)",
            user.username,
            user.role.as_str(),
            user.balance_cents
        );
        Ok(user)
    }

    pub fn get_user(&self, user_id: Uuid) -> EngineResult<User> {
        self.db.read(|conn| Accounts::new(conn).require(user_id))
    }

    pub fn get_user_by_username(&self, username: &str) -> EngineResult<Option<User>> {
        self.db.read(|conn| {
            let user = conn
                .query_row(
                    &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                    params![username],
                    user_from_row,
                )
                .optional()?;
            Ok(user)
        })
    }

    /// List all users, newest first
    pub fn list_users(&self) -> EngineResult<Vec<User>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, rowid DESC"
            ))?;
            let users = stmt
                .query_map([], user_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })
    }

    /// Promote or demote between USER and ADMIN. Only a SUPER_ADMIN may do this, and
    /// SUPER_ADMIN accounts themselves are fixed.
    pub fn change_role(&self, actor_id: Uuid, target_id: Uuid, role: UserRole) -> EngineResult<User> {
        let (actor, previous, updated) = self.db.atomic(|tx| {
            let accounts = Accounts::new(tx);
            let actor = accounts.require(actor_id)?;
            require_super_admin(&actor)?;

            let target = accounts.require(target_id)?;
            if target.role == UserRole::SuperAdmin {
                return Err(EngineError::invalid_argument(
                    "cannot change the role of a SUPER_ADMIN",
                ));
            }
            if target.role == role {
                return Err(EngineError::invalid_argument(format!(
                    "user already has role {}",
                    role.as_str()
                )));
            }
            if role == UserRole::SuperAdmin {
                return Err(EngineError::invalid_argument(
                    "roles can only move between USER and ADMIN",
                ));
            }

            tx.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                params![role.as_str(), target_id.to_string()],
            )?;
            Ok((actor, target.role, accounts.require(target_id)?))
        })?;

        info!(
            actor = %actor.username,
            target = %updated.username,
            from = previous.as_str(),
            to = updated.role.as_str(),
            "🔐 Role changed"
        );
        Ok(updated)
    }
}
