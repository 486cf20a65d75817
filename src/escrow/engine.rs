//! Match State Machine
//!
//! WAITING → IN_PROGRESS → {FINISHED | DISPUTE}, DISPUTE → FINISHED.
//!
//! Each transition loads the match inside one atomic unit, checks every guard before
//! touching anything, then moves balances, appends ledger rows and writes the new
//! match state. Either all of it commits or none of it does.

use rusqlite::Transaction;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{EngineError, EngineResult};
use crate::escrow::accounts::Accounts;
use crate::escrow::audit::{self, AuditReport};
use crate::escrow::guard::{self, TransitionOutcome};
use crate::escrow::ledger::Ledger;
use crate::escrow::matches::MatchRows;
use crate::escrow::platform_config::ConfigSource;
use crate::escrow::settlement::settle;
use crate::models::{
    LedgerEntry, Match, MatchStatus, NewLedgerEntry, PlatformConfig, PlatformStats,
};

/// Engine policy knobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Reject `finish` from actors who hold neither seat
    pub finish_requires_participant: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            finish_requires_participant: true,
        }
    }
}

pub struct MatchEngine {
    db: Arc<Database>,
    config: Arc<dyn ConfigSource>,
    settings: EngineSettings,
}

impl MatchEngine {
    pub fn new(db: Arc<Database>, config: Arc<dyn ConfigSource>, settings: EngineSettings) -> Self {
        Self {
            db,
            config,
            settings,
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Open a match and escrow the creator's entry fee.
    ///
    /// The fee is `entry_fee_override` when given, else the platform default.
    pub fn create(
        &self,
        actor_id: Uuid,
        game: &str,
        entry_fee_override: Option<i64>,
    ) -> EngineResult<Match> {
        let game = game.trim();
        if game.is_empty() {
            return Err(EngineError::invalid_argument("game must not be empty"));
        }

        let (created, balance) = self.db.atomic(|tx| {
            let accounts = Accounts::new(tx);
            accounts.require(actor_id)?;

            let config = self.config.current_config(tx)?;
            let fee = entry_fee_override.unwrap_or(config.default_entry_fee_cents);
            if fee < 0 {
                return Err(EngineError::invalid_argument(format!(
                    "entry fee must be non-negative, got {fee}"
                )));
            }
            // Reject stakes that could never be settled before any money moves
            settle(fee, 0)?;

            let balance = if fee > 0 {
                Some(accounts.debit(actor_id, fee)?)
            } else {
                None
            };

            let created = MatchRows::new(tx).insert(game, fee, actor_id)?;
            if fee > 0 {
                Ledger::new(tx).append(NewLedgerEntry::entry_fee(actor_id, created.id, fee))?;
            }
            Ok((created, balance))
        })?;

        info!(
            match_id = %created.id,
            created_by_id = %created.created_by_id,
            entry_fee_cents = created.entry_fee_cents,
            new_balance_cents = ?balance,
            "🎮 Match created"
        );
        Ok(created)
    }

    /// Take the second seat of a WAITING match and escrow the same fee.
    ///
    /// Not idempotent: a second join is rejected, never absorbed.
    pub fn join(&self, actor_id: Uuid, match_id: Uuid) -> EngineResult<Match> {
        let (joined, balance) = self.db.atomic(|tx| {
            let rows = MatchRows::new(tx);
            let current = rows.require(match_id)?;

            if current.status != MatchStatus::Waiting {
                // The seat holder retrying gets the one-shot rejection
                if current.joined_by_id == Some(actor_id) {
                    return Err(EngineError::AlreadyJoined);
                }
                return Err(EngineError::InvalidTransition {
                    action: "join",
                    status: current.status,
                });
            }
            if current.created_by_id == actor_id {
                return Err(EngineError::SelfJoinForbidden);
            }
            if current.joined_by_id.is_some() {
                return Err(EngineError::AlreadyJoined);
            }

            let accounts = Accounts::new(tx);
            accounts.require(actor_id)?;

            let fee = current.entry_fee_cents;
            let balance = if fee > 0 {
                let balance = accounts.debit(actor_id, fee)?;
                Ledger::new(tx).append(NewLedgerEntry::entry_fee(actor_id, match_id, fee))?;
                Some(balance)
            } else {
                None
            };

            rows.mark_joined(match_id, actor_id)?;
            Ok((rows.require(match_id)?, balance))
        })?;

        info!(
            match_id = %joined.id,
            joined_by_id = %actor_id,
            entry_fee_cents = joined.entry_fee_cents,
            new_balance_cents = ?balance,
            "🤝 Match joined"
        );
        Ok(joined)
    }

    /// Settle an IN_PROGRESS match in favour of `winner_id`.
    ///
    /// Replays the stored result if the match is already FINISHED.
    pub fn finish(&self, actor_id: Uuid, match_id: Uuid, winner_id: Uuid) -> EngineResult<Match> {
        let outcome = self.db.atomic(|tx| {
            let current = MatchRows::new(tx).require(match_id)?;
            if let Some(replay) = guard::settlement_replay(&current) {
                return Ok(replay);
            }

            if current.status != MatchStatus::InProgress {
                return Err(EngineError::InvalidTransition {
                    action: "finish",
                    status: current.status,
                });
            }
            if self.settings.finish_requires_participant && !current.is_participant(actor_id) {
                return Err(EngineError::Forbidden {
                    reason: "only participants can finish a match",
                });
            }

            self.settle_in(tx, &current, winner_id)
                .map(TransitionOutcome::Applied)
        })?;

        log_settlement("🏁 Match finished", actor_id, &outcome);
        Ok(outcome.into_match())
    }

    /// Flag an IN_PROGRESS match as disputed. Repeat calls return the match unchanged.
    pub fn dispute(&self, actor_id: Uuid, match_id: Uuid) -> EngineResult<Match> {
        let outcome = self.db.atomic(|tx| {
            let rows = MatchRows::new(tx);
            let current = rows.require(match_id)?;

            if !current.is_participant(actor_id) {
                return Err(EngineError::Forbidden {
                    reason: "only participants can dispute a match",
                });
            }
            if current.status == MatchStatus::Waiting || current.status.is_terminal() {
                return Err(EngineError::InvalidTransition {
                    action: "dispute",
                    status: current.status,
                });
            }
            if let Some(replay) = guard::dispute_replay(&current) {
                return Ok(replay);
            }

            rows.mark_disputed(match_id)?;
            Ok(TransitionOutcome::Applied(rows.require(match_id)?))
        })?;

        match &outcome {
            TransitionOutcome::Applied(m) => {
                info!(match_id = %m.id, user_id = %actor_id, "⚖️ Match disputed")
            }
            TransitionOutcome::Replayed(m) => {
                debug!(match_id = %m.id, user_id = %actor_id, "Dispute replayed, already disputed")
            }
        }
        Ok(outcome.into_match())
    }

    /// Settle a DISPUTE match. Admin privilege is asserted by the caller before this
    /// point; match and winner invariants are still checked here.
    pub fn resolve(&self, actor_id: Uuid, match_id: Uuid, winner_id: Uuid) -> EngineResult<Match> {
        let outcome = self.db.atomic(|tx| {
            let current = MatchRows::new(tx).require(match_id)?;
            if let Some(replay) = guard::settlement_replay(&current) {
                return Ok(replay);
            }

            if current.status != MatchStatus::Dispute {
                return Err(EngineError::InvalidTransition {
                    action: "resolve",
                    status: current.status,
                });
            }

            self.settle_in(tx, &current, winner_id)
                .map(TransitionOutcome::Applied)
        })?;

        log_settlement("🧑‍⚖️ Dispute resolved", actor_id, &outcome);
        Ok(outcome.into_match())
    }

    /// Pay the winner, record the result and close the match. Caller has already
    /// checked the status.
    fn settle_in(&self, tx: &Transaction<'_>, current: &Match, winner_id: Uuid) -> EngineResult<Match> {
        if !current.status.can_advance_to(MatchStatus::Finished) || current.joined_by_id.is_none() {
            return Err(EngineError::InvalidTransition {
                action: "settle",
                status: current.status,
            });
        }
        let loser_id = current
            .opponent_of(winner_id)
            .ok_or(EngineError::InvalidWinner)?;

        let config = self.config.current_config(tx)?;
        let split = settle(current.entry_fee_cents, config.commission_bps)?;

        let accounts = Accounts::new(tx);
        accounts.credit(winner_id, split.prize_cents)?;
        accounts.increment_wins(winner_id)?;
        accounts.increment_losses(loser_id)?;

        Ledger::new(tx).append(NewLedgerEntry::win_payout(
            winner_id,
            current.id,
            split.prize_cents,
        ))?;

        let rows = MatchRows::new(tx);
        rows.mark_finished(
            current.id,
            current.status,
            winner_id,
            split.prize_cents,
            split.commission_cents,
        )?;
        rows.require(current.id)
    }

    pub fn get_match(&self, match_id: Uuid) -> EngineResult<Match> {
        self.db.read(|conn| MatchRows::new(conn).require(match_id))
    }

    /// Newest first
    pub fn list_matches(&self, limit: usize) -> EngineResult<Vec<Match>> {
        self.db.read(|conn| MatchRows::new(conn).list(limit))
    }

    pub fn platform_stats(&self) -> EngineResult<PlatformStats> {
        self.db.read(|conn| MatchRows::new(conn).stats())
    }

    pub fn current_config(&self) -> EngineResult<PlatformConfig> {
        self.db.read(|conn| self.config.current_config(conn))
    }

    pub fn ledger_for_match(&self, match_id: Uuid) -> EngineResult<Vec<LedgerEntry>> {
        self.db.read(|conn| Ledger::new(conn).entries_for_match(match_id))
    }

    pub fn ledger_for_user(&self, user_id: Uuid) -> EngineResult<Vec<LedgerEntry>> {
        self.db.read(|conn| Ledger::new(conn).entries_for_user(user_id))
    }

    pub fn audit_match(&self, match_id: Uuid) -> EngineResult<AuditReport> {
        self.db.read(|conn| audit::audit_match(conn, match_id))
    }
}

fn log_settlement(message: &'static str, actor_id: Uuid, outcome: &TransitionOutcome) {
    match outcome {
        TransitionOutcome::Applied(m) => info!(
            match_id = %m.id,
            actor_id = %actor_id,
            winner_id = ?m.winner_id,
            prize_cents = ?m.prize_cents,
            commission_cents = ?m.commission_cents,
            "{}",
            message
        ),
        TransitionOutcome::Replayed(m) => debug!(
            match_id = %m.id,
            actor_id = %actor_id,
            "Settlement replayed, match already finished"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseOptions;
    use crate::escrow::platform_config::{FixedConfig, StoredConfig};
    use crate::models::LedgerEntryType;
    use rusqlite::params;
    use tempfile::NamedTempFile;

    struct Fixture {
        engine: MatchEngine,
        alice: Uuid,
        bob: Uuid,
        carol: Uuid,
        _temp: NamedTempFile,
    }

    fn fixture_with(config: Arc<dyn ConfigSource>, settings: EngineSettings) -> Fixture {
        let temp = NamedTempFile::new().unwrap();
        let db = Arc::new(
            Database::open(temp.path().to_str().unwrap(), DatabaseOptions::default()).unwrap(),
        );
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        db.atomic(|tx| {
            for (id, name) in ids.iter().zip(["alice", "bob", "carol"]) {
                tx.execute(
                    "INSERT INTO users (id, username, balance_cents, created_at)
                     VALUES (?1, ?2, 1000, 'now')",
                    params![id.to_string(), name],
                )?;
            }
            Ok(())
        })
        .unwrap();

        Fixture {
            engine: MatchEngine::new(db, config, settings),
            alice: ids[0],
            bob: ids[1],
            carol: ids[2],
            _temp: temp,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(StoredConfig::new()), EngineSettings::default())
    }

    fn balance(f: &Fixture, user: Uuid) -> i64 {
        f.engine
            .database()
            .read(|conn| Accounts::new(conn).balance_of(user))
            .unwrap()
    }

    #[test]
    fn test_full_settlement_scenario() {
        let f = fixture();

        let m = f.engine.create(f.alice, "chess", Some(500)).unwrap();
        assert_eq!(m.status, MatchStatus::Waiting);
        assert_eq!(balance(&f, f.alice), 500);

        let m = f.engine.join(f.bob, m.id).unwrap();
        assert_eq!(m.status, MatchStatus::InProgress);
        assert_eq!(m.joined_by_id, Some(f.bob));
        assert_eq!(balance(&f, f.bob), 500);

        let m = f.engine.finish(f.alice, m.id, f.alice).unwrap();
        assert_eq!(m.status, MatchStatus::Finished);
        assert_eq!(m.winner_id, Some(f.alice));
        assert_eq!(m.prize_cents, Some(950));
        assert_eq!(m.commission_cents, Some(50));
        assert_eq!(balance(&f, f.alice), 1450);
        assert_eq!(balance(&f, f.bob), 500);

        let ledger = f.engine.ledger_for_match(m.id).unwrap();
        let amounts: Vec<(LedgerEntryType, i64)> =
            ledger.iter().map(|e| (e.entry_type, e.amount_cents)).collect();
        assert_eq!(
            amounts,
            vec![
                (LedgerEntryType::EntryFee, -500),
                (LedgerEntryType::EntryFee, -500),
                (LedgerEntryType::WinPayout, 950),
            ]
        );
        assert_eq!(ledger[2].user_id, f.alice);
    }

    #[test]
    fn test_default_fee_comes_from_config() {
        let f = fixture_with(
            Arc::new(FixedConfig(PlatformConfig {
                default_entry_fee_cents: 200,
                commission_bps: 1000,
                updated_at: None,
            })),
            EngineSettings::default(),
        );
        let m = f.engine.create(f.alice, "go", None).unwrap();
        assert_eq!(m.entry_fee_cents, 200);

        f.engine.join(f.bob, m.id).unwrap();
        let m = f.engine.finish(f.bob, m.id, f.bob).unwrap();
        assert_eq!(m.commission_cents, Some(40));
        assert_eq!(m.prize_cents, Some(360));
    }

    #[test]
    fn test_insufficient_funds_creates_nothing() {
        let f = fixture();
        let err = f.engine.create(f.alice, "chess", Some(5000)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(balance(&f, f.alice), 1000);
        assert!(f.engine.list_matches(50).unwrap().is_empty());
    }

    #[test]
    fn test_failed_join_leaves_match_waiting() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(800)).unwrap();
        f.engine
            .database()
            .atomic(|tx| Accounts::new(tx).debit(f.bob, 900))
            .unwrap();

        let err = f.engine.join(f.bob, m.id).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));

        let reloaded = f.engine.get_match(m.id).unwrap();
        assert_eq!(reloaded.status, MatchStatus::Waiting);
        assert_eq!(reloaded.joined_by_id, None);
        assert_eq!(balance(&f, f.bob), 100);
        assert_eq!(f.engine.ledger_for_user(f.bob).unwrap().len(), 0);
    }

    #[test]
    fn test_join_guards() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(100)).unwrap();

        assert!(matches!(
            f.engine.join(f.alice, m.id),
            Err(EngineError::SelfJoinForbidden)
        ));
        assert_eq!(balance(&f, f.alice), 900);

        f.engine.join(f.bob, m.id).unwrap();
        assert!(matches!(
            f.engine.join(f.bob, m.id),
            Err(EngineError::AlreadyJoined)
        ));
        assert_eq!(balance(&f, f.bob), 900);
        assert!(matches!(
            f.engine.join(f.carol, m.id),
            Err(EngineError::InvalidTransition { action: "join", .. })
        ));
        assert!(matches!(
            f.engine.join(f.carol, Uuid::new_v4()),
            Err(EngineError::NotFound { entity: "match", .. })
        ));
        assert_eq!(balance(&f, f.carol), 1000);
    }

    #[test]
    fn test_free_match_moves_no_money() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(0)).unwrap();
        f.engine.join(f.bob, m.id).unwrap();
        assert_eq!(f.engine.ledger_for_match(m.id).unwrap().len(), 0);

        let m = f.engine.finish(f.bob, m.id, f.bob).unwrap();
        assert_eq!(m.prize_cents, Some(0));
        assert_eq!(balance(&f, f.alice), 1000);
        assert_eq!(balance(&f, f.bob), 1000);

        let ledger = f.engine.ledger_for_match(m.id).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].entry_type, LedgerEntryType::WinPayout);
    }

    #[test]
    fn test_finish_guards() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(100)).unwrap();

        assert!(matches!(
            f.engine.finish(f.alice, m.id, f.alice),
            Err(EngineError::InvalidTransition { action: "finish", status: MatchStatus::Waiting })
        ));

        f.engine.join(f.bob, m.id).unwrap();
        assert!(matches!(
            f.engine.finish(f.alice, m.id, f.carol),
            Err(EngineError::InvalidWinner)
        ));
        assert!(matches!(
            f.engine.finish(f.carol, m.id, f.alice),
            Err(EngineError::Forbidden { .. })
        ));
        assert_eq!(f.engine.get_match(m.id).unwrap().status, MatchStatus::InProgress);
    }

    #[test]
    fn test_permissive_finish_policy() {
        let f = fixture_with(
            Arc::new(StoredConfig::new()),
            EngineSettings {
                finish_requires_participant: false,
            },
        );
        let m = f.engine.create(f.alice, "chess", Some(100)).unwrap();
        f.engine.join(f.bob, m.id).unwrap();
        let m = f.engine.finish(f.carol, m.id, f.bob).unwrap();
        assert_eq!(m.winner_id, Some(f.bob));
    }

    #[test]
    fn test_finish_replays_without_side_effects() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(500)).unwrap();
        f.engine.join(f.bob, m.id).unwrap();

        let first = f.engine.finish(f.alice, m.id, f.alice).unwrap();
        let second = f.engine.finish(f.bob, m.id, f.bob).unwrap();
        assert_eq!(first, second);
        assert_eq!(balance(&f, f.alice), 1450);
        assert_eq!(f.engine.ledger_for_match(m.id).unwrap().len(), 3);

        // Replay wins over every later guard, including the actor policy
        let third = f.engine.finish(f.carol, m.id, f.carol).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_dispute_and_resolve() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(500)).unwrap();

        assert!(matches!(
            f.engine.dispute(f.alice, m.id),
            Err(EngineError::InvalidTransition { action: "dispute", .. })
        ));

        f.engine.join(f.bob, m.id).unwrap();
        assert!(matches!(
            f.engine.dispute(f.carol, m.id),
            Err(EngineError::Forbidden { .. })
        ));
        assert!(matches!(
            f.engine.resolve(f.carol, m.id, f.bob),
            Err(EngineError::InvalidTransition { action: "resolve", .. })
        ));

        let disputed = f.engine.dispute(f.bob, m.id).unwrap();
        assert_eq!(disputed.status, MatchStatus::Dispute);
        assert_eq!(f.engine.dispute(f.alice, m.id).unwrap(), disputed);

        assert!(matches!(
            f.engine.finish(f.alice, m.id, f.alice),
            Err(EngineError::InvalidTransition { action: "finish", .. })
        ));

        let resolved = f.engine.resolve(f.carol, m.id, f.bob).unwrap();
        assert_eq!(resolved.status, MatchStatus::Finished);
        assert_eq!(resolved.winner_id, Some(f.bob));
        assert_eq!(balance(&f, f.bob), 1450);

        let again = f.engine.resolve(f.carol, m.id, f.alice).unwrap();
        assert_eq!(again, resolved);
        assert!(matches!(
            f.engine.dispute(f.alice, m.id),
            Err(EngineError::InvalidTransition { action: "dispute", status: MatchStatus::Finished })
        ));

        let user = f
            .engine
            .database()
            .read(|conn| Accounts::new(conn).require(f.alice))
            .unwrap();
        assert_eq!(user.losses, 1);
        assert_eq!(user.wins, 0);
    }

    #[test]
    fn test_commission_change_applies_to_next_settlement() {
        let f = fixture();
        let first = f.engine.create(f.alice, "chess", Some(100)).unwrap();
        f.engine.join(f.bob, first.id).unwrap();

        f.engine
            .database()
            .atomic(|tx| {
                crate::escrow::platform_config::set_commission_bps(
                    tx,
                    2500,
                    &PlatformConfig::default(),
                )
            })
            .unwrap();

        let settled = f.engine.finish(f.alice, first.id, f.alice).unwrap();
        assert_eq!(settled.commission_cents, Some(50));
        assert_eq!(settled.prize_cents, Some(150));
    }

    #[test]
    fn test_resolve_rejects_non_participant_winner() {
        let f = fixture();
        let m = f.engine.create(f.alice, "chess", Some(500)).unwrap();
        f.engine.join(f.bob, m.id).unwrap();
        let disputed = f.engine.dispute(f.alice, m.id).unwrap();

        assert!(matches!(
            f.engine.resolve(f.carol, m.id, f.carol),
            Err(EngineError::InvalidWinner)
        ));

        assert_eq!(f.engine.get_match(m.id).unwrap(), disputed);
        assert_eq!(balance(&f, f.alice), 500);
        assert_eq!(balance(&f, f.bob), 500);
        assert_eq!(balance(&f, f.carol), 1000);
        assert_eq!(f.engine.ledger_for_match(m.id).unwrap().len(), 2);
        assert!(f.engine.ledger_for_user(f.carol).unwrap().is_empty());
    }

    #[test]
    fn test_unsettleable_fee_rejected_before_debit() {
        let f = fixture();
        f.engine
            .database()
            .atomic(|tx| {
                tx.execute(
                    "UPDATE users SET balance_cents = ?1 WHERE id = ?2",
                    params![i64::MAX, f.alice.to_string()],
                )?;
                Ok(())
            })
            .unwrap();

        let err = f
            .engine
            .create(f.alice, "chess", Some(i64::MAX / 2 + 1))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { .. }));
        assert_eq!(balance(&f, f.alice), i64::MAX);
        assert!(f.engine.list_matches(50).unwrap().is_empty());

        // Largest settleable fee still goes through to the balance check
        let m = f.engine.create(f.alice, "chess", Some(i64::MAX / 2)).unwrap();
        assert_eq!(balance(&f, f.alice), i64::MAX - i64::MAX / 2);
        assert_eq!(m.entry_fee_cents, i64::MAX / 2);
        assert!(matches!(
            f.engine.create(f.bob, "chess", Some(i64::MAX / 2)),
            Err(EngineError::InsufficientFunds { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_create_arguments() {
        let f = fixture();
        assert!(matches!(
            f.engine.create(f.alice, "   ", Some(100)),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            f.engine.create(f.alice, "chess", Some(-100)),
            Err(EngineError::InvalidArgument { .. })
        ));
        assert!(matches!(
            f.engine.create(Uuid::new_v4(), "chess", Some(0)),
            Err(EngineError::NotFound { entity: "user", .. })
        ));
    }
}
