//! `roster sync`: process pending records for every enabled institution.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use roster_core::InstitutionId;
use roster_runner::{InstitutionSummary, PhaseSummary, RunOptions, RunSummary};

use super::home_dir;

/// Arguments for `roster sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Only process this institution.
    #[arg(long, short = 'i', value_name = "ID")]
    pub institution: Option<u32>,

    /// Show the destination calls a run would make without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Concurrent update workers per institution (overrides config.yaml).
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub concurrency: Option<u16>,

    /// Keep running, starting a pass every SECS seconds until ctrl-c.
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub every: Option<u64>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let options = RunOptions {
            institution: self.institution.map(InstitutionId),
            dry_run: self.dry_run,
            concurrency: self.concurrency.map(usize::from),
        };

        if let Some(secs) = self.every {
            println!("Running every {secs}s, press ctrl-c to stop.");
            roster_runner::start_blocking(&home, options, Duration::from_secs(secs))
                .context("periodic sync failed")?;
            return Ok(());
        }

        let summary = roster_runner::run_blocking(&home, options).context("sync failed")?;
        print_summary(&summary);
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    let prefix = if summary.dry_run { "[dry-run] " } else { "" };
    if summary.institutions.is_empty() {
        println!("{prefix}No enabled institutions. Run `roster institution add` first.");
        return;
    }

    for institution in &summary.institutions {
        print_institution(prefix, institution);
    }

    let failures = summary.failures();
    let line = format!(
        "{prefix}{} institution(s) in {} ms, {failures} failure(s)",
        summary.institutions.len(),
        summary.duration_ms
    );
    if failures > 0 {
        println!("{}", line.red());
    } else {
        println!("{}", line.green());
    }
}

fn print_institution(prefix: &str, institution: &InstitutionSummary) {
    if let Some(error) = &institution.error {
        println!(
            "{prefix}{} institution {} ('{}'): {error}",
            "✗".red(),
            institution.institution,
            institution.name
        );
        return;
    }
    if institution.busy {
        println!(
            "{prefix}{} institution {} ('{}'): busy, another sync holds it",
            "-".yellow(),
            institution.institution,
            institution.name
        );
        return;
    }

    println!(
        "{prefix}✓ institution {} ('{}')",
        institution.institution, institution.name
    );
    for (phase, counts) in [
        ("import", &institution.import),
        ("delete", &institution.delete),
        ("update", &institution.update),
    ] {
        if counts.processed > 0 || counts.skipped > 0 {
            println!("  {phase:<6}  {}", phase_line(counts));
        }
    }
    for call in &institution.planned {
        println!("  ~  {call}");
    }
}

fn phase_line(counts: &PhaseSummary) -> String {
    let mut parts = vec![format!("{} ok", counts.succeeded)];
    if counts.not_eligible > 0 {
        parts.push(format!("{} not eligible", counts.not_eligible));
    }
    if counts.redirected > 0 {
        parts.push(format!("{} redirected", counts.redirected));
    }
    if counts.skipped > 0 {
        parts.push(format!("{} in flight", counts.skipped));
    }
    if counts.failures() > 0 {
        parts.push(format!("{} failed", counts.failures()).red().to_string());
    }
    parts.join(", ")
}
