use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use roster_core::{
    registry, settings, DirectoryClient, FileRecordStore, Institution, InstitutionId,
    InstitutionLock, MemoryRecordStore, RecordStore,
};
use roster_lms::{DirectoryError, DryRunDirectory, HttpDirectory};
use roster_sync::KeyLockRegistry;

use crate::error::{io_err, RunnerError};
use crate::log_sink::{FileLogSink, LogSink, TracingLogSink};
use crate::paths::{logs_dir, ROTATION_INTERVAL};
use crate::scheduler::{InstitutionSummary, Scheduler};

/// Builds the destination client for an institution.
pub trait Destinations: Send + Sync {
    fn connect(&self, institution: &Institution)
        -> Result<Arc<dyn DirectoryClient>, DirectoryError>;
}

/// Connects to each institution's configured HTTP endpoint.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpDestinations;

impl Destinations for HttpDestinations {
    fn connect(
        &self,
        institution: &Institution,
    ) -> Result<Arc<dyn DirectoryClient>, DirectoryError> {
        let client = HttpDirectory::from_config(&institution.destination)?;
        Ok(Arc::new(client))
    }
}

/// What a run covers.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Process only this institution.
    pub institution: Option<InstitutionId>,
    /// Work on an in-memory copy of the records against a recording client.
    pub dry_run: bool,
    /// Overrides `update_concurrency` from the settings.
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub institutions: Vec<InstitutionSummary>,
    pub duration_ms: u128,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.institutions
            .iter()
            .map(|i| i.failures() + usize::from(i.error.is_some()))
            .sum()
    }
}

/// Run a single pass and block the current thread until it finishes.
pub fn run_blocking(home: &Path, options: RunOptions) -> Result<RunSummary, RunnerError> {
    init_tracing();
    build_runtime()?.block_on(run_once(home, &options, &HttpDestinations))
}

/// Run passes every `every` until ctrl-c, blocking the current thread.
pub fn start_blocking(
    home: &Path,
    options: RunOptions,
    every: Duration,
) -> Result<(), RunnerError> {
    init_tracing();
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    build_runtime()?.block_on(run_periodic(
        home.to_path_buf(),
        options,
        every,
        Arc::new(HttpDestinations),
        shutdown_tx,
    ))
}

/// One pass over every enabled institution (or the selected one).
///
/// A live pass records the run marker and appends to the status log. A dry
/// run copies each institution's records into memory, talks to a
/// [`DryRunDirectory`] and writes nothing under `home`.
pub async fn run_once(
    home: &Path,
    options: &RunOptions,
    destinations: &dyn Destinations,
) -> Result<RunSummary, RunnerError> {
    run_pass(home, options, destinations, &KeyLockRegistry::new()).await
}

/// [`run_once`] with an in-flight registry shared across passes.
///
/// A live pass also takes each institution's [`InstitutionLock`]; an
/// institution another process is syncing is reported busy and left alone.
pub async fn run_pass(
    home: &Path,
    options: &RunOptions,
    destinations: &dyn Destinations,
    locks: &Arc<KeyLockRegistry>,
) -> Result<RunSummary, RunnerError> {
    let started = Instant::now();
    let started_at = Utc::now();

    let mut run_settings = settings::load_at(home)?;
    if let Some(concurrency) = options.concurrency {
        run_settings.update_concurrency = concurrency.max(1);
    }
    let institutions = select_institutions(home, options.institution)?;

    let sink: Arc<dyn LogSink> = if options.dry_run {
        Arc::new(TracingLogSink)
    } else {
        ensure_runtime_dirs(home)?;
        settings::record_run_at(home, &run_settings.service_name, started_at)?;
        Arc::new(FileLogSink::at_home(home, run_settings.service_name.clone()))
    };
    sink.send(&format!(
        "run started: {} institution(s){}",
        institutions.len(),
        if options.dry_run { ", dry run" } else { "" }
    ));

    let scheduler =
        Scheduler::new(home, run_settings, Arc::clone(&sink)).with_locks(Arc::clone(locks));
    let mut summaries = Vec::with_capacity(institutions.len());
    for institution in &institutions {
        let result = if options.dry_run {
            dry_run_institution(&scheduler, home, institution).await
        } else {
            live_institution(&scheduler, home, institution, destinations).await
        };
        let summary = result.unwrap_or_else(|err| {
            tracing::error!(institution = %institution.id, error = %err, "institution skipped");
            sink.send(&format!("institution {}: skipped: {err}", institution.id));
            InstitutionSummary::failed(institution.id, &institution.name, err.to_string())
        });
        summaries.push(summary);
    }

    let duration_ms = started.elapsed().as_millis();
    sink.send(&format!("run finished in {duration_ms} ms"));
    sink.flush();

    Ok(RunSummary {
        started_at,
        dry_run: options.dry_run,
        institutions: summaries,
        duration_ms,
    })
}

/// Periodic passes until `shutdown` fires or ctrl-c is received.
///
/// A pass in progress always runs to completion; a pass that fails is logged
/// and the next one is attempted on schedule.
pub async fn run_periodic(
    home: PathBuf,
    options: RunOptions,
    every: Duration,
    destinations: Arc<dyn Destinations>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), RunnerError> {
    ensure_runtime_dirs(&home)?;

    let pass_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = pass_task(home, options, every, destinations, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, finishing current pass");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(RunnerError::Task(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (pass_result, rotation_result, signal_result) =
        tokio::join!(pass_handle, rotation_handle, signal_handle);

    handle_join("pass", pass_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn pass_task(
    home: PathBuf,
    options: RunOptions,
    every: Duration,
    destinations: Arc<dyn Destinations>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RunnerError> {
    let locks = KeyLockRegistry::new();
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match run_pass(&home, &options, destinations.as_ref(), &locks).await {
                    Ok(summary) => tracing::info!(
                        institutions = summary.institutions.len(),
                        failures = summary.failures(),
                        duration_ms = summary.duration_ms as u64,
                        "pass finished"
                    ),
                    Err(err) => tracing::error!(error = %err, "pass failed"),
                }
            }
        }
    }
    Ok(())
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), RunnerError> {
    let mut interval = tokio::time::interval(ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || crate::log_rotation::rotate_logs(&home))
                    .await
                    .ok();
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Institutions
// ---------------------------------------------------------------------------

async fn live_institution(
    scheduler: &Scheduler,
    home: &Path,
    institution: &Institution,
    destinations: &dyn Destinations,
) -> Result<InstitutionSummary, RunnerError> {
    let Some(_lock) = InstitutionLock::try_acquire_at(home, institution.id)? else {
        tracing::warn!(institution = %institution.id, "institution busy, another run holds it");
        scheduler.sink().send(&format!(
            "institution {}: skipped, another run holds it",
            institution.id
        ));
        return Ok(InstitutionSummary::busy(institution.id, &institution.name));
    };

    let client = destinations.connect(institution)?;
    let store: Arc<dyn RecordStore> = Arc::new(FileRecordStore::open_at(home, institution.id)?);
    scheduler
        .run_institution(institution.id, &institution.name, store, client)
        .await
}

async fn dry_run_institution(
    scheduler: &Scheduler,
    home: &Path,
    institution: &Institution,
) -> Result<InstitutionSummary, RunnerError> {
    let records = FileRecordStore::open_at(home, institution.id)?.records()?;
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::with_records(records));
    let directory = Arc::new(DryRunDirectory::new());

    let mut summary = scheduler
        .run_institution(
            institution.id,
            &institution.name,
            store,
            Arc::clone(&directory) as Arc<dyn DirectoryClient>,
        )
        .await?;
    summary.planned = directory.calls().iter().map(ToString::to_string).collect();
    Ok(summary)
}

/// Enabled institutions, or exactly the requested one.
fn select_institutions(
    home: &Path,
    only: Option<InstitutionId>,
) -> Result<Vec<Institution>, RunnerError> {
    if let Some(id) = only {
        let institution = registry::load_institution_at(home, id)?;
        if !institution.enabled {
            return Err(RunnerError::InstitutionDisabled(id));
        }
        return Ok(vec![institution]);
    }

    let mut selected = Vec::new();
    for institution in registry::list_institutions_at(home)? {
        if institution.enabled {
            selected.push(institution);
        } else {
            tracing::info!(institution = %institution.id, "institution disabled, skipping");
        }
    }
    Ok(selected)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ensure_runtime_dirs(home: &Path) -> Result<(), RunnerError> {
    let logs = logs_dir(home);
    if !logs.exists() {
        fs::create_dir_all(&logs).map_err(|e| io_err(&logs, e))?;
    }
    Ok(())
}

fn build_runtime() -> Result<tokio::runtime::Runtime, RunnerError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), RunnerError>, tokio::task::JoinError>,
) -> Result<(), RunnerError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(RunnerError::Task(format!("{task} task join failure: {err}"))),
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::DestinationConfig;
    use tempfile::TempDir;

    fn register(home: &Path, id: u32, enabled: bool) {
        let mut institution = registry::add_institution_at(
            home,
            InstitutionId(id),
            format!("School {id}"),
            DestinationConfig {
                endpoint: "http://localhost:9".to_string(),
                username: "sync".to_string(),
                password_env: None,
                timeout_secs: 1,
            },
        )
        .unwrap();
        institution.enabled = enabled;
        registry::save_institution_at(home, &institution).unwrap();
    }

    #[test]
    fn selection_skips_disabled_institutions() {
        let home = TempDir::new().unwrap();
        register(home.path(), 1, true);
        register(home.path(), 2, false);

        let ids: Vec<_> = select_institutions(home.path(), None)
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![InstitutionId(1)]);
    }

    #[test]
    fn selecting_a_disabled_institution_is_an_error() {
        let home = TempDir::new().unwrap();
        register(home.path(), 2, false);
        let err = select_institutions(home.path(), Some(InstitutionId(2))).unwrap_err();
        assert!(matches!(err, RunnerError::InstitutionDisabled(InstitutionId(2))));
    }

    #[test]
    fn run_summary_counts_unreachable_institutions() {
        let summary = RunSummary {
            started_at: Utc::now(),
            dry_run: false,
            institutions: vec![InstitutionSummary::failed(
                InstitutionId(1),
                "School 1",
                "missing password".to_string(),
            )],
            duration_ms: 0,
        };
        assert_eq!(summary.failures(), 1);
    }
}
