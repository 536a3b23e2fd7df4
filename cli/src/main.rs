//! chainlog: operator CLI for the audit ledger.
//!
//! Records events, queries and verifies partitions, and takes checkpoints
//! against a file-backed ledger.
//!
//! Usage:
//!   chainlog --data-dir ./audit record --partition org-1 --action create \
//!       --entity-type invoice --entity-id 1 --actor user-7 --after '{"total":100}'
//!   chainlog --data-dir ./audit verify --partition org-1
//!   chainlog --config chainlog.toml query --partition org-1 --actor user-7
//!   chainlog demo

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use chainlog_contracts::{
    entry::{Action, AuditEvent, EntityRef},
    error::{ChainError, ChainResult},
    query::QueryFilter,
    state::StateValue,
};
use chainlog_ledger::{AuditLedger, LedgerConfig, StoreKind};

/// Store location used when neither `--config` nor `--data-dir` is given.
const DEFAULT_DATA_DIR: &str = "chainlog-data";

/// Exit code for a verification run that found a break.
const EXIT_BROKEN: u8 = 2;

// ── CLI definition ────────────────────────────────────────────────────────────

/// chainlog: append-only, hash-chained audit ledger.
#[derive(Parser)]
#[command(
    name = "chainlog",
    about = "Append-only, hash-chained audit ledger",
    long_about = "Records business events into per-partition SHA-256 hash chains\n\
                  and verifies that nothing stored has been altered, removed, or reordered."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of a file-backed store. Overrides the configured store.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record one event.
    Record {
        #[arg(long)]
        partition: String,
        /// create, update, delete, or compensating_correction.
        #[arg(long)]
        action: Action,
        #[arg(long)]
        entity_type: String,
        #[arg(long)]
        entity_id: String,
        #[arg(long)]
        actor: String,
        /// Snapshot before the change, as JSON.
        #[arg(long)]
        before: Option<String>,
        /// Snapshot after the change, as JSON.
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Verify a partition's hash chain. Exits with status 2 if it is broken.
    Verify {
        #[arg(long)]
        partition: String,
        #[arg(long, default_value_t = 1)]
        from: u64,
        /// Defaults to the last stored entry.
        #[arg(long)]
        to: Option<u64>,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Print matching entries as JSON lines.
    Query {
        #[arg(long)]
        partition: String,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        action: Option<Action>,
        #[arg(long)]
        entity_type: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print a partition's tail.
    Tail {
        #[arg(long)]
        partition: String,
    },
    /// Print a checkpoint of a partition's current tail.
    Checkpoint {
        #[arg(long)]
        partition: String,
    },
    /// List partitions that hold entries.
    Partitions,
    /// Run the invoice scenario on an in-memory ledger.
    Demo,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    // Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("chainlog error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> ChainResult<ExitCode> {
    if let Command::Demo = cli.command {
        run_demo()?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(cli.config.as_ref(), cli.data_dir.as_ref())?;
    if config.store.kind == StoreKind::Memory {
        warn!("using an in-memory store; nothing will be persisted");
    }
    let ledger = AuditLedger::from_config(&config)?;

    match cli.command {
        Command::Record {
            partition,
            action,
            entity_type,
            entity_id,
            actor,
            before,
            after,
            idempotency_key,
        } => {
            let event = AuditEvent {
                action,
                entity_ref: EntityRef::new(entity_type, entity_id),
                actor_id: actor,
                before_state: before.as_deref().map(parse_state).transpose()?,
                after_state: after.as_deref().map(parse_state).transpose()?,
                idempotency_key,
            };
            let entry = ledger.record_event(&partition, event)?;
            println!("{} {} {}", entry.entry_id, entry.sequence, entry.current_hash);
        }

        Command::Verify {
            partition,
            from,
            to,
            json,
        } => {
            let to = to.unwrap_or(u64::MAX);
            let report = ledger.verify(&partition, from..=to)?;
            if json {
                println!("{}", to_json(&report)?);
            } else {
                print!("{}", report);
            }
            if !report.valid {
                return Ok(ExitCode::from(EXIT_BROKEN));
            }
        }

        Command::Query {
            partition,
            actor,
            action,
            entity_type,
            entity_id,
            limit,
        } => {
            let filter = QueryFilter {
                actor_id: actor,
                action,
                entity_type,
                entity_id,
                limit,
                ..QueryFilter::default()
            };
            for entry in ledger.query(&partition, filter)? {
                println!("{}", to_json_line(&entry?)?);
            }
        }

        Command::Tail { partition } => {
            println!("{}", to_json(&ledger.tail(&partition)?)?);
        }

        Command::Checkpoint { partition } => {
            println!("{}", to_json(&ledger.checkpoint(&partition)?)?);
        }

        Command::Partitions => {
            for key in ledger.partitions()? {
                println!("{}", key);
            }
        }

        Command::Demo => {}
    }

    Ok(ExitCode::SUCCESS)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Resolve the ledger configuration from the global flags.
fn load_config(
    config_path: Option<&PathBuf>,
    data_dir: Option<&PathBuf>,
) -> ChainResult<LedgerConfig> {
    let mut config = match config_path {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::file(DEFAULT_DATA_DIR),
    };
    if let Some(dir) = data_dir {
        config.store.kind = StoreKind::File;
        config.store.root = Some(dir.clone());
    }
    config.validate()?;
    debug!(store = ?config.store, "configuration resolved");
    Ok(config)
}

fn parse_state(raw: &str) -> ChainResult<StateValue> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| ChainError::EncodingError {
            reason: format!("snapshot is not valid JSON: {}", e),
        })?;
    StateValue::try_from(value)
}

fn to_json<T: Serialize>(value: &T) -> ChainResult<String> {
    serde_json::to_string_pretty(value).map_err(|e| ChainError::EncodingError {
        reason: format!("failed to render JSON: {}", e),
    })
}

fn to_json_line<T: Serialize>(value: &T) -> ChainResult<String> {
    serde_json::to_string(value).map_err(|e| ChainError::EncodingError {
        reason: format!("failed to render JSON: {}", e),
    })
}

// ── Demo ──────────────────────────────────────────────────────────────────────

fn print_section(title: &str) {
    println!();
    println!("── {} {}", title, "─".repeat(60usize.saturating_sub(title.len())));
}

fn invoice(total: i64) -> StateValue {
    StateValue::map([("total", StateValue::Integer(total))])
}

/// Create and update an invoice, then verify and checkpoint the partition.
fn run_demo() -> ChainResult<()> {
    let ledger = AuditLedger::in_memory();

    print_section("Recording");
    ledger.record(
        "org-1",
        Action::Create,
        EntityRef::new("invoice", "1"),
        "user-7",
        None,
        Some(invoice(100)),
    )?;
    ledger.record(
        "org-1",
        Action::Update,
        EntityRef::new("invoice", "1"),
        "user-7",
        Some(invoice(100)),
        Some(invoice(150)),
    )?;
    for entry in ledger.query("org-1", QueryFilter::default())? {
        let entry = entry?;
        println!(
            "  #{} {:<8} {} by {}",
            entry.sequence,
            entry.action.as_str(),
            entry.entity_ref,
            entry.actor_id
        );
        println!("     prev {}", entry.previous_hash);
        println!("     hash {}", entry.current_hash);
    }

    print_section("Verification");
    let report = ledger.verify("org-1", 1..=2)?;
    print!("{}", report);
    report.ensure_valid()?;

    print_section("Checkpoint");
    let checkpoint = ledger.checkpoint("org-1")?;
    println!("  #{} {}", checkpoint.sequence, checkpoint.hash);
    ledger.record(
        "org-1",
        Action::Delete,
        EntityRef::new("invoice", "1"),
        "user-9",
        Some(invoice(150)),
        None,
    )?;
    print!("{}", ledger.verify_from_checkpoint(&checkpoint, 3)?);

    println!();
    println!("Demo completed successfully.");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
