//! `roster audit <id>`: tail of an institution's audit trail.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use roster_core::{store, AuditEntry, InstitutionId};

use super::home_dir;

/// Arguments for `roster audit`.
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Institution id.
    pub id: u32,

    /// Number of most recent entries to show.
    #[arg(long, short = 'n', default_value_t = 20)]
    pub lines: usize,

    /// Only show failed entries.
    #[arg(long)]
    pub failed: bool,
}

impl AuditArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = store::audit_path_at(&home, InstitutionId(self.id));
        let entries = store::read_audit_file(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let selected: Vec<&AuditEntry> = entries
            .iter()
            .filter(|e| !self.failed || !e.success)
            .collect();
        if selected.is_empty() {
            println!("No audit entries for institution {}.", self.id);
            return Ok(());
        }

        let skip = selected.len().saturating_sub(self.lines);
        println!("==> {} <==", path.display());
        for entry in &selected[skip..] {
            println!("{}", format_entry(entry));
        }
        Ok(())
    }
}

fn format_entry(entry: &AuditEntry) -> String {
    let outcome = if entry.success {
        "ok".green().to_string()
    } else {
        format!("FAILED: {}", entry.error_message).red().to_string()
    };
    format!(
        "{} {:<6} {} ({}) {outcome}",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
        entry.action.to_string(),
        entry.username,
        entry.sync_key
    )
}
