//! Wager CLI
//!
//! Operator front end for the match escrow engine. Every command prints a JSON snapshot
//! on stdout; failures print `{"error": kind, "message": ...}` and exit non-zero.
//!
//! Usage:
//!   wager init
//!   wager user add --username alice --balance 10000
//!   wager match create --actor <USER_ID> --game chess --fee 500
//!   wager match finish --actor <USER_ID> --match-id <MATCH_ID> --winner <USER_ID>

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use wager_backend::auth::{require_admin, UserStore};
use wager_backend::config::{resolve_data_path, AppConfig, DEFAULT_DB_FILENAME};
use wager_backend::escrow::platform_config::{set_commission_bps, set_default_entry_fee};
use wager_backend::escrow::{StoredConfig, DEFAULT_LIST_LIMIT};
use wager_backend::models::{PlatformConfig, UserRole};
use wager_backend::{Database, EngineError, MatchEngine};

/// Match escrow & settlement engine
#[derive(Parser, Debug)]
#[command(name = "wager")]
#[command(about = "Escrow entry fees for two-player matches and settle them to the winner")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, env = "WAGER_DB_PATH")]
    db_path: Option<String>,

    /// Milliseconds to wait on the database write lock
    #[arg(long, env = "WAGER_BUSY_TIMEOUT_MS")]
    busy_timeout_ms: Option<u64>,

    /// Extra attempts for a transition that lost a lock race
    #[arg(long, env = "WAGER_CONFLICT_RETRIES")]
    conflict_retries: Option<u32>,

    /// Only participants may finish a match
    #[arg(
        long,
        env = "WAGER_FINISH_REQUIRES_PARTICIPANT",
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    finish_requires_participant: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema
    Init,

    /// User registry
    #[command(subcommand)]
    User(UserCommand),

    /// Match lifecycle
    #[command(subcommand)]
    Match(MatchCommand),

    /// Ledger entries for a user or a match
    Ledger(LedgerArgs),

    /// Platform commission and default entry fee
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Platform-wide match and volume totals
    Stats,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    /// Register a user
    Add {
        #[arg(short, long)]
        username: String,

        /// USER, ADMIN or SUPER_ADMIN
        #[arg(short, long, default_value = "USER")]
        role: String,

        /// Starting balance in cents
        #[arg(short, long, default_value = "0")]
        balance: i64,
    },

    /// List users, newest first
    List,

    /// Show one user
    Show { user_id: Uuid },

    /// Promote or demote a user (super admin only)
    SetRole {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        target: Uuid,

        #[arg(long)]
        role: String,
    },
}

#[derive(Subcommand, Debug)]
enum MatchCommand {
    /// Open a match and escrow the creator's fee
    Create {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        game: String,

        /// Entry fee in cents (platform default if omitted)
        #[arg(long)]
        fee: Option<i64>,
    },

    /// Take the second seat
    Join {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        match_id: Uuid,
    },

    /// Settle an in-progress match
    Finish {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        match_id: Uuid,

        #[arg(long)]
        winner: Uuid,
    },

    /// Flag an in-progress match as disputed
    Dispute {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        match_id: Uuid,
    },

    /// Settle a disputed match (admin only)
    Resolve {
        #[arg(long)]
        actor: Uuid,

        #[arg(long)]
        match_id: Uuid,

        #[arg(long)]
        winner: Uuid,
    },

    /// Show one match
    Show { match_id: Uuid },

    /// List matches, newest first
    List {
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Cross-check a match against its ledger rows
    Audit { match_id: Uuid },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct LedgerArgs {
    #[arg(long)]
    user: Option<Uuid>,

    #[arg(long = "match")]
    match_id: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Show the current platform config
    Show,

    /// Set the commission in basis points (admin only)
    SetCommission {
        #[arg(long)]
        actor: Uuid,

        #[arg(long, allow_negative_numbers = true)]
        bps: i64,
    },

    /// Set the default entry fee in cents (admin only)
    SetDefaultFee {
        #[arg(long)]
        actor: Uuid,

        #[arg(long, allow_negative_numbers = true)]
        cents: i64,
    },
}

struct App {
    db: Arc<Database>,
    engine: MatchEngine,
    users: UserStore,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(err) => {
            let kind = err
                .downcast_ref::<EngineError>()
                .map(EngineError::kind)
                .unwrap_or("Internal");
            let body = json!({ "error": kind, "message": format!("{err:#}") });
            println!("{body}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let app = open_app(&cli)?;

    let value = match cli.command {
        Commands::Init => json!({ "database": app.db.path(), "ready": true }),
        Commands::User(cmd) => run_user(&app, cmd)?,
        Commands::Match(cmd) => run_match(&app, cmd)?,
        Commands::Ledger(args) => match (args.user, args.match_id) {
            (Some(user_id), _) => to_json(&app.engine.ledger_for_user(user_id)?)?,
            (None, Some(match_id)) => to_json(&app.engine.ledger_for_match(match_id)?)?,
            (None, None) => anyhow::bail!("either --user or --match is required"),
        },
        Commands::Config(cmd) => run_config(&app, cmd)?,
        Commands::Stats => to_json(&app.engine.platform_stats()?)?,
    };

    serde_json::to_string_pretty(&value).context("Failed to render output")
}

fn open_app(cli: &Cli) -> Result<App> {
    let mut config = AppConfig::from_env();
    if let Some(path) = cli.db_path.clone() {
        config.db_path = resolve_data_path(Some(path), DEFAULT_DB_FILENAME);
    }
    if let Some(ms) = cli.busy_timeout_ms {
        config.database.busy_timeout = Duration::from_millis(ms);
    }
    if let Some(retries) = cli.conflict_retries {
        config.database.conflict_retries = retries;
    }
    if let Some(strict) = cli.finish_requires_participant {
        config.engine.finish_requires_participant = strict;
    }

    let db = Arc::new(
        Database::open(&config.db_path, config.database.clone())
            .with_context(|| format!("Failed to open database at {}", config.db_path))?,
    );
    let engine = MatchEngine::new(db.clone(), Arc::new(StoredConfig::new()), config.engine);
    let users = UserStore::new(db.clone());

    Ok(App { db, engine, users })
}

fn run_user(app: &App, cmd: UserCommand) -> Result<Value> {
    match cmd {
        UserCommand::Add {
            username,
            role,
            balance,
        } => to_json(&app.users.create_user(&username, parse_role(&role)?, balance)?),
        UserCommand::List => to_json(&app.users.list_users()?),
        UserCommand::Show { user_id } => to_json(&app.users.get_user(user_id)?),
        UserCommand::SetRole {
            actor,
            target,
            role,
        } => to_json(&app.users.change_role(actor, target, parse_role(&role)?)?),
    }
}

fn run_match(app: &App, cmd: MatchCommand) -> Result<Value> {
    let engine = &app.engine;
    match cmd {
        MatchCommand::Create { actor, game, fee } => to_json(&engine.create(actor, &game, fee)?),
        MatchCommand::Join { actor, match_id } => to_json(&engine.join(actor, match_id)?),
        MatchCommand::Finish {
            actor,
            match_id,
            winner,
        } => to_json(&engine.finish(actor, match_id, winner)?),
        MatchCommand::Dispute { actor, match_id } => to_json(&engine.dispute(actor, match_id)?),
        MatchCommand::Resolve {
            actor,
            match_id,
            winner,
        } => {
            require_admin(&app.users.get_user(actor)?)?;
            to_json(&engine.resolve(actor, match_id, winner)?)
        }
        MatchCommand::Show { match_id } => to_json(&engine.get_match(match_id)?),
        MatchCommand::List { limit } => to_json(&engine.list_matches(limit)?),
        MatchCommand::Audit { match_id } => to_json(&engine.audit_match(match_id)?),
    }
}

fn run_config(app: &App, cmd: ConfigCommand) -> Result<Value> {
    let fallback = PlatformConfig::default();
    match cmd {
        ConfigCommand::Show => to_json(&app.engine.current_config()?),
        ConfigCommand::SetCommission { actor, bps } => {
            require_admin(&app.users.get_user(actor)?)?;
            let updated = app.db.atomic(|tx| set_commission_bps(tx, bps, &fallback))?;
            info!(actor = %actor, "Platform config changed");
            to_json(&updated)
        }
        ConfigCommand::SetDefaultFee { actor, cents } => {
            require_admin(&app.users.get_user(actor)?)?;
            let updated = app.db.atomic(|tx| set_default_entry_fee(tx, cents, &fallback))?;
            info!(actor = %actor, "Platform config changed");
            to_json(&updated)
        }
    }
}

fn parse_role(raw: &str) -> Result<UserRole> {
    UserRole::from_str(raw)
        .ok_or_else(|| EngineError::invalid_argument(format!("unknown role '{raw}'")).into())
}

fn to_json<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}

fn init_tracing() {
    // stdout carries JSON output, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wager_backend=info,wager=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
