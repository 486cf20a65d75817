//! Platform Config Lookup
//! Mission: Serve commission rate and default entry fee to the engine, fresh on every call
//!
//! The engine never caches these values: operators may change the commission between
//! matches and the next create/finish/resolve must see it.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::models::{PlatformConfig, MAX_COMMISSION_BPS};

/// Source of the platform config, injected into the engine.
///
/// Called inside the transition's atomic unit, so `conn` is the open transaction.
pub trait ConfigSource: Send + Sync {
    fn current_config(&self, conn: &Connection) -> EngineResult<PlatformConfig>;
}

/// Reads the persisted singleton row, falling back to an explicit default
#[derive(Debug, Clone, Default)]
pub struct StoredConfig {
    fallback: PlatformConfig,
}

impl StoredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: PlatformConfig) -> Self {
        Self { fallback }
    }
}

impl ConfigSource for StoredConfig {
    fn current_config(&self, conn: &Connection) -> EngineResult<PlatformConfig> {
        Ok(load(conn)?.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Pinned config, ignores the store
#[derive(Debug, Clone)]
pub struct FixedConfig(pub PlatformConfig);

impl ConfigSource for FixedConfig {
    fn current_config(&self, _conn: &Connection) -> EngineResult<PlatformConfig> {
        Ok(self.0.clone())
    }
}

/// Persisted row, if any
pub fn load(conn: &Connection) -> EngineResult<Option<PlatformConfig>> {
    let row = conn
        .query_row(
            "SELECT default_entry_fee_cents, commission_bps, updated_at
             FROM platform_config WHERE id = 1 LIMIT 1",
            [],
            |row| {
                Ok(PlatformConfig {
                    default_entry_fee_cents: row.get(0)?,
                    commission_bps: row.get(1)?,
                    updated_at: Some(row.get(2)?),
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn validate_commission_bps(commission_bps: i64) -> EngineResult<u32> {
    if !(0..=i64::from(MAX_COMMISSION_BPS)).contains(&commission_bps) {
        return Err(EngineError::invalid_argument(format!(
            "commission_bps must be within 0..={MAX_COMMISSION_BPS}, got {commission_bps}"
        )));
    }
    Ok(commission_bps as u32)
}

/// Upsert the commission; a freshly created row takes the other fields from `fallback`
pub fn set_commission_bps(
    conn: &Connection,
    commission_bps: i64,
    fallback: &PlatformConfig,
) -> EngineResult<PlatformConfig> {
    let commission_bps = validate_commission_bps(commission_bps)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO platform_config (id, default_entry_fee_cents, commission_bps, updated_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            commission_bps = excluded.commission_bps,
            updated_at = excluded.updated_at",
        params![fallback.default_entry_fee_cents, commission_bps, &now],
    )?;

    let config = load(conn)?.ok_or_else(|| EngineError::not_found("platform_config", 1))?;
    info!(
        commission_bps = config.commission_bps,
        "💰 Commission updated ({:.2}%)",
        f64::from(config.commission_bps) / 100.0
    );
    Ok(config)
}

/// Upsert the default entry fee; a freshly created row takes the commission from `fallback`
pub fn set_default_entry_fee(
    conn: &Connection,
    default_entry_fee_cents: i64,
    fallback: &PlatformConfig,
) -> EngineResult<PlatformConfig> {
    if default_entry_fee_cents < 0 {
        return Err(EngineError::invalid_argument(format!(
            "default entry fee must be non-negative, got {default_entry_fee_cents}"
        )));
    }
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO platform_config (id, default_entry_fee_cents, commission_bps, updated_at)
         VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET
            default_entry_fee_cents = excluded.default_entry_fee_cents,
            updated_at = excluded.updated_at",
        params![default_entry_fee_cents, fallback.commission_bps, &now],
    )?;

    let config = load(conn)?.ok_or_else(|| EngineError::not_found("platform_config", 1))?;
    info!(
        default_entry_fee_cents = config.default_entry_fee_cents,
        "💰 Default entry fee updated"
    );
    Ok(config)
}
