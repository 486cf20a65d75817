//! Process Configuration
//! Mission: Resolve database location and engine knobs from `.env` and the environment
//!
//! Platform economics (commission, default fee) are not here; they live in the
//! `platform_config` row and are read per transition.

use dotenv::dotenv;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::db::DatabaseOptions;
use crate::escrow::EngineSettings;

pub const DEFAULT_DB_FILENAME: &str = "wager.db";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub database: DatabaseOptions,
    pub engine: EngineSettings,
}

impl AppConfig {
    /// Load `.env` files, then read `WAGER_*` variables over the defaults
    pub fn from_env() -> Self {
        load_env();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DatabaseOptions::default();
        let busy_timeout_ms = parse_or(
            lookup("WAGER_BUSY_TIMEOUT_MS"),
            defaults.busy_timeout.as_millis() as u64,
        );
        let conflict_retries = parse_or(lookup("WAGER_CONFLICT_RETRIES"), defaults.conflict_retries);
        let finish_requires_participant = lookup("WAGER_FINISH_REQUIRES_PARTICIPANT")
            .and_then(|v| parse_bool(&v))
            .unwrap_or(EngineSettings::default().finish_requires_participant);

        Self {
            db_path: resolve_data_path(lookup("WAGER_DB_PATH"), DEFAULT_DB_FILENAME),
            database: DatabaseOptions {
                busy_timeout: Duration::from_millis(busy_timeout_ms),
                conflict_retries,
            },
            engine: EngineSettings {
                finish_requires_participant,
            },
        }
    }
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn default_data_path(filename: &str) -> String {
    // Anchor defaults to the crate directory
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

/// Absolute paths pass through; relative ones are anchored at the crate directory
pub fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    base.join(p).to_string_lossy().to_string()
}

pub fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Crate-dir .env, for runs started from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
