//! Wager Backend Library
//!
//! Match escrow and settlement engine: two players stake an entry fee, the winner takes
//! the pot minus platform commission, and every cent is traceable through the ledger.
//! Exposes core modules for use by the CLI binary and tests.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod escrow;
pub mod models;

pub use db::{Database, DatabaseOptions};
pub use error::{EngineError, EngineResult};
pub use escrow::{EngineSettings, MatchEngine};
