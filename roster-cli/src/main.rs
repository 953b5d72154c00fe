//! Roster: person reconciliation between a directory and an LMS.
//!
//! # Usage
//!
//! ```text
//! roster init
//! roster institution list
//! roster institution add <id> --name <name> --endpoint <url> --username <user> [--password-env VAR]
//! roster institution show <id> [--json]
//! roster institution enable|disable <id>
//! roster sync [--institution <id>] [--dry-run] [--concurrency N] [--every SECS]
//! roster status [--json]
//! roster audit <id> [--lines N]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    audit::AuditArgs, init::InitArgs, institution::InstitutionCommand, status::StatusArgs,
    sync::SyncArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "roster",
    version,
    about = "Reconcile directory person records into a learning-management system",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create ~/.roster/config.yaml with default batch settings.
    Init(InitArgs),

    /// Manage registered institutions.
    Institution {
        #[command(subcommand)]
        command: InstitutionCommand,
    },

    /// Process pending import, delete and update records.
    Sync(SyncArgs),

    /// Show pending and errored records per institution.
    Status(StatusArgs),

    /// Show the most recent audit entries of an institution.
    Audit(AuditArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Institution { command } => commands::institution::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Audit(args) => args.run(),
    }
}
