//! `roster status`: pending work and errors per institution.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use roster_core::{
    registry, settings, FileRecordStore, Institution, PendingFilter, PersonRecord,
};

use super::home_dir;

/// Arguments for `roster status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize)]
struct InstitutionStatus {
    id: u32,
    name: String,
    enabled: bool,
    records: usize,
    pending_import: usize,
    pending_delete: usize,
    pending_update: usize,
    errored: usize,
}

#[derive(Serialize)]
struct StatusReport {
    service_name: String,
    last_run_at: Option<String>,
    institutions: Vec<InstitutionStatus>,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "id")]
    id: u32,
    #[tabled(rename = "institution")]
    name: String,
    #[tabled(rename = "records")]
    records: usize,
    #[tabled(rename = "import")]
    pending_import: usize,
    #[tabled(rename = "delete")]
    pending_delete: usize,
    #[tabled(rename = "update")]
    pending_update: usize,
    #[tabled(rename = "errored")]
    errored: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let report = build_report(&home)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(report);
        Ok(())
    }
}

fn build_report(home: &Path) -> Result<StatusReport> {
    let config = settings::load_at(home).context("failed to load ~/.roster/config.yaml")?;
    let marker = settings::load_run_marker_at(home).context("failed to read run marker")?;
    let institutions =
        registry::list_institutions_at(home).context("failed to load institution registry")?;

    let mut rows = Vec::with_capacity(institutions.len());
    for institution in &institutions {
        let store = FileRecordStore::open_at(home, institution.id)
            .with_context(|| format!("failed to open records of institution {}", institution.id))?;
        let records = store.records()?;
        rows.push(institution_status(institution, &records));
    }

    Ok(StatusReport {
        service_name: config.service_name,
        last_run_at: marker.map(|m| m.last_run_at.to_rfc3339()),
        institutions: rows,
    })
}

fn institution_status(institution: &Institution, records: &[PersonRecord]) -> InstitutionStatus {
    let count = |filter: PendingFilter| records.iter().filter(|r| filter.matches(r)).count();
    InstitutionStatus {
        id: institution.id.0,
        name: institution.name.clone(),
        enabled: institution.enabled,
        records: records.len(),
        pending_import: count(PendingFilter::Import),
        pending_delete: count(PendingFilter::Delete),
        pending_update: count(PendingFilter::Update),
        errored: records.iter().filter(|r| r.error).count(),
    }
}

fn print_table(report: StatusReport) {
    println!(
        "Roster v{} | service '{}' | last run {}",
        env!("CARGO_PKG_VERSION"),
        report.service_name,
        report.last_run_at.as_deref().unwrap_or("never"),
    );

    if report.institutions.is_empty() {
        println!("No institutions registered.");
        return;
    }

    let errored_total: usize = report.institutions.iter().map(|i| i.errored).sum();
    let rows: Vec<StatusRow> = report
        .institutions
        .into_iter()
        .map(|i| StatusRow {
            id: i.id,
            name: if i.enabled {
                i.name
            } else {
                format!("{} (disabled)", i.name).bright_black().to_string()
            },
            records: i.records,
            pending_import: i.pending_import,
            pending_delete: i.pending_delete,
            pending_update: i.pending_update,
            errored: if i.errored > 0 {
                i.errored.to_string().red().bold().to_string()
            } else {
                "0".to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if errored_total > 0 {
        println!("Run 'roster audit <id> --failed' to see why records failed.");
    }
}
