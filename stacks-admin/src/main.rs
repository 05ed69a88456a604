//! Stacks operator CLI
//!
//! Applies the built-in schema migrations and inspects a live inventory:
//! positions holding more than one container, per-shelf capacity, and the
//! refile queue in retrieval order.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use stacks::capacity::{audit_capacity, audit_occupancy};
use stacks::config::StacksConfig;
use stacks::migration::{startup_migrations, Migrator};
use stacks::model::{BuildingId, ShelfId};
use stacks::queue::{sort_for_retrieval, RetrievalMember, RetrievalSource};
use stacks::store::postgres::PgDatabase;
use stacks::store::{Database, UnitOfWork};
use std::process;

#[derive(Parser)]
#[command(name = "stacks-admin")]
#[command(about = "Operator tool for the stacks inventory database")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (overrides config and STACKS__DATABASE__URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },

    /// Occupancy and capacity checks
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },

    /// Print the refile queue in retrieval order
    RefileQueue {
        /// Only entries shelved in this building
        #[arg(long)]
        building: Option<i64>,
    },
}

#[derive(Subcommand)]
enum MigrateAction {
    /// Show applied vs pending migrations
    Status,

    /// Apply pending migrations
    Up {
        /// Show what would be applied without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate checksums of applied migrations
    Validate,
}

#[derive(Subcommand)]
enum AuditAction {
    /// List positions referenced by more than one container
    Occupancy,

    /// Capacity, occupancy and per-position occupants of one shelf
    Capacity {
        #[arg(long)]
        shelf: i64,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = StacksConfig::load().context("loading configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    let db = PgDatabase::connect(&config.database).context("connecting to the database")?;

    if !matches!(cli.command, Commands::Migrate { .. }) {
        startup_migrations(db.pool(), &config.migrations).context("bringing the schema up to date")?;
    }

    match cli.command {
        Commands::Migrate { action } => migrate(&db, &config, action),
        Commands::Audit {
            action: AuditAction::Occupancy,
        } => occupancy(&db),
        Commands::Audit {
            action: AuditAction::Capacity { shelf },
        } => capacity(&db, ShelfId(shelf)),
        Commands::RefileQueue { building } => refile_queue(&db, building.map(BuildingId)),
    }
}

fn migrate(db: &PgDatabase, config: &StacksConfig, action: MigrateAction) -> Result<()> {
    let migrator = Migrator::builtin();
    match action {
        MigrateAction::Status => {
            let conn = db.pool().acquire()?;
            let status = migrator.status(&conn)?;

            println!("\n{}\n", "Migration Status".bold());
            if status.applied.is_empty() {
                println!("Applied: none");
            }
            for record in &status.applied {
                let took = record
                    .execution_time_ms
                    .map_or_else(|| "N/A".to_string(), |ms| format!("{ms}ms"));
                println!(
                    "  {} {:>4} {} ({}, {took})",
                    "✓".green(),
                    record.version,
                    record.name,
                    record.applied_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            for pending in &status.pending {
                println!("  {} {:>4} {} (pending)", "…".yellow(), pending.version, pending.name);
            }
            println!(
                "\nSummary: {} applied, {} pending",
                status.applied.len(),
                status.pending.len()
            );
        }
        MigrateAction::Up { dry_run: true } => {
            let conn = db.pool().acquire()?;
            let status = migrator.status(&conn)?;
            if status.is_up_to_date() {
                println!("No pending migrations to apply");
            } else {
                println!("Would apply {} migration(s):", status.pending.len());
                for (i, pending) in status.pending.iter().enumerate() {
                    println!("  {}. {} {}", i + 1, pending.version, pending.name);
                }
            }
        }
        MigrateAction::Up { dry_run: false } => {
            let applied = migrator.up(db.pool(), config.migrations.lock_timeout_seconds)?;
            if applied > 0 {
                println!("{} applied {applied} migration(s)", "✓".green());
            } else {
                println!("{} no migrations to apply", "✓".green());
            }
        }
        MigrateAction::Validate => {
            let conn = db.pool().acquire()?;
            migrator.validate_checksums(&conn)?;
            println!("{} all checksums valid", "✓".green());
        }
    }
    Ok(())
}

fn occupancy(db: &PgDatabase) -> Result<()> {
    let session = db.begin()?;
    let shared = audit_occupancy(&session)?;
    session.rollback()?;

    if shared.is_empty() {
        println!("{} every position holds at most one container", "✓".green());
        return Ok(());
    }
    for position in &shared {
        let occupants: Vec<String> = position.occupants.iter().map(ToString::to_string).collect();
        println!(
            "{} position {}: {}",
            "✗".red(),
            position.position_id,
            occupants.join(", ")
        );
    }
    bail!("{} position(s) hold more than one container", shared.len())
}

fn capacity(db: &PgDatabase, shelf: ShelfId) -> Result<()> {
    let session = db.begin()?;
    let audit = audit_capacity(&session, shelf)?;
    session.rollback()?;

    println!(
        "Shelf {}: capacity {}, occupied {}, available {}",
        audit.capacity.shelf_id, audit.capacity.max_capacity, audit.capacity.occupied, audit.available_space
    );
    for position in &audit.positions {
        let occupants = if position.occupants.is_empty() {
            "empty".dimmed().to_string()
        } else {
            position
                .occupants
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        println!("  #{:<3} {:<10} {occupants}", position.number, position.position_id);
    }
    Ok(())
}

fn refile_queue(db: &PgDatabase, building: Option<BuildingId>) -> Result<()> {
    let session = db.begin()?;
    let entries = sort_for_retrieval(&session, RetrievalSource::RefileQueue { building })?;
    session.rollback()?;

    if entries.is_empty() {
        println!("Refile queue is empty");
        return Ok(());
    }
    for (i, entry) in entries.iter().enumerate() {
        let member = match entry.member {
            RetrievalMember::Item(id) => format!("Item {id}"),
            RetrievalMember::Container(reference) => reference.to_string(),
        };
        let address = entry
            .address
            .clone()
            .unwrap_or_else(|| "unshelved".yellow().to_string());
        println!("{:>4}. {member:<24} {address}", i + 1);
    }
    Ok(())
}
