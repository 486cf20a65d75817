//! Match Escrow & Settlement
//!
//! Two players each escrow an entry fee into a match; on finish or dispute resolution
//! the pooled stake minus platform commission is paid to the winner. Every money
//! movement leaves an immutable ledger row, and every transition commits as one unit.

pub mod accounts;
pub mod audit;
pub mod engine;
pub mod guard;
pub mod ledger;
pub mod matches;
pub mod platform_config;
pub mod settlement;

pub use accounts::Accounts;
pub use audit::{audit_match, AuditReport};
pub use engine::{EngineSettings, MatchEngine};
pub use guard::TransitionOutcome;
pub use ledger::Ledger;
pub use matches::{MatchRows, DEFAULT_LIST_LIMIT};
pub use platform_config::{ConfigSource, FixedConfig, StoredConfig};
pub use settlement::{settle, Settlement};
