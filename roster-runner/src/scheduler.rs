//! Per-institution phase loop.
//!
//! Every institution runs three phases in order: import, delete, update.
//! Import and delete records are handled one at a time in store order. The
//! update batch fans out over a bounded pool of blocking workers; each worker
//! holds the record's [`KeyGuard`] for as long as it runs, and the phase ends
//! only once every worker has reported.
//!
//! The institution policy is re-read from the registry at the start of each
//! phase and shared read-only by every worker of that phase.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use roster_core::{
    registry, DirectoryClient, InstitutionId, InstitutionSyncPolicy, PendingFilter, PersonRecord,
    RecordStore, RosterSettings, SortOrder, SyncKey,
};
use roster_sync::{KeyLockRegistry, Outcome, Reconciler, RecordReport, SyncError};

use crate::error::RunnerError;
use crate::log_sink::LogSink;

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Counts for one phase of one institution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub not_eligible: usize,
    pub failed: usize,
    pub redirected: usize,
    /// Records whose key was already in flight.
    pub skipped: usize,
    /// Records that could not be written back to the store.
    pub errors: usize,
}

impl PhaseSummary {
    fn record(
        &mut self,
        sink: &dyn LogSink,
        sync_key: &SyncKey,
        result: Result<RecordReport, SyncError>,
    ) {
        self.processed += 1;
        match result {
            Ok(report) => {
                match &report.outcome {
                    Outcome::Succeeded => self.succeeded += 1,
                    Outcome::NotEligible => self.not_eligible += 1,
                    Outcome::Failed { .. } | Outcome::EmptyPayload => self.failed += 1,
                    Outcome::Redirected { .. } => self.redirected += 1,
                }
                if report.outcome.is_failure() {
                    tracing::warn!("{report}");
                } else {
                    tracing::info!("{report}");
                }
                sink.send(&report.to_string());
            }
            Err(err) => {
                self.errors += 1;
                tracing::error!(sync_key = %sync_key, error = %err, "record could not be settled");
                sink.send(&format!("{sync_key}: not settled: {err}"));
            }
        }
    }

    fn skip_in_flight(&mut self, sink: &dyn LogSink, institution: InstitutionId, key: &SyncKey) {
        self.skipped += 1;
        tracing::warn!(sync_key = %key, "update skipped, key already in flight");
        sink.send(&format!(
            "institution {institution}: update {key} skipped, already in flight"
        ));
    }

    /// Records left in an error state or not written back.
    pub fn failures(&self) -> usize {
        self.failed + self.errors
    }
}

/// Outcome of one institution within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstitutionSummary {
    pub institution: InstitutionId,
    pub name: String,
    pub import: PhaseSummary,
    pub delete: PhaseSummary,
    pub update: PhaseSummary,
    /// Set when the institution could not be processed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Another run held the institution, so nothing was processed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub busy: bool,
    /// Destination calls a dry run would have made.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub planned: Vec<String>,
}

impl InstitutionSummary {
    pub fn new(institution: InstitutionId, name: impl Into<String>) -> Self {
        Self {
            institution,
            name: name.into(),
            import: PhaseSummary::default(),
            delete: PhaseSummary::default(),
            update: PhaseSummary::default(),
            error: None,
            busy: false,
            planned: Vec::new(),
        }
    }

    pub fn busy(institution: InstitutionId, name: impl Into<String>) -> Self {
        Self {
            busy: true,
            ..Self::new(institution, name)
        }
    }

    pub fn failed(institution: InstitutionId, name: impl Into<String>, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(institution, name)
        }
    }

    pub fn failures(&self) -> usize {
        self.import.failures() + self.delete.failures() + self.update.failures()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

type SequentialStep =
    fn(&Reconciler, PersonRecord, &InstitutionSyncPolicy) -> Result<RecordReport, SyncError>;

/// Drives the reconciler over an institution's pending records.
pub struct Scheduler {
    home: PathBuf,
    settings: RosterSettings,
    locks: Arc<KeyLockRegistry>,
    sink: Arc<dyn LogSink>,
}

impl Scheduler {
    pub fn new(home: impl Into<PathBuf>, settings: RosterSettings, sink: Arc<dyn LogSink>) -> Self {
        Self {
            home: home.into(),
            settings,
            locks: KeyLockRegistry::new(),
            sink,
        }
    }

    /// Share an in-flight registry with other schedulers.
    pub fn with_locks(mut self, locks: Arc<KeyLockRegistry>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<KeyLockRegistry> {
        &self.locks
    }

    pub fn settings(&self) -> &RosterSettings {
        &self.settings
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Run the import, delete and update phases for one institution.
    ///
    /// Per-record failures are counted in the summary; only registry and
    /// store query failures end the institution early.
    pub async fn run_institution(
        &self,
        institution: InstitutionId,
        name: &str,
        store: Arc<dyn RecordStore>,
        client: Arc<dyn DirectoryClient>,
    ) -> Result<InstitutionSummary, RunnerError> {
        let reconciler = Reconciler::new(institution, Arc::clone(&store), client);
        let mut summary = InstitutionSummary::new(institution, name);

        summary.import = self
            .sequential_phase(
                &reconciler,
                &store,
                PendingFilter::Import,
                SortOrder::UpdatedAt,
                None,
                |r, record, policy| r.import(record, policy),
            )
            .await?;
        summary.delete = self
            .sequential_phase(
                &reconciler,
                &store,
                PendingFilter::Delete,
                SortOrder::Storage,
                Some(self.settings.delete_batch_size),
                |r, record, _| r.delete(record),
            )
            .await?;
        summary.update = self.update_phase(&reconciler, &store).await?;

        self.sink.send(&format!(
            "institution {institution}: imported {}, deleted {}, updated {}, failed {}",
            summary.import.succeeded,
            summary.delete.succeeded,
            summary.update.succeeded,
            summary.failures()
        ));
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    /// Import or delete: one record at a time on a blocking thread, records
    /// without a raw payload left untouched.
    async fn sequential_phase(
        &self,
        reconciler: &Reconciler,
        store: &Arc<dyn RecordStore>,
        filter: PendingFilter,
        order: SortOrder,
        limit: Option<usize>,
        step: SequentialStep,
    ) -> Result<PhaseSummary, RunnerError> {
        let home = self.home.clone();
        let reconciler = reconciler.clone();
        let store = Arc::clone(store);
        let sink = Arc::clone(&self.sink);

        tokio::task::spawn_blocking(move || -> Result<PhaseSummary, RunnerError> {
            let policy = registry::load_policy_at(&home, reconciler.institution())?;
            let records = store.find_pending(filter, order, limit)?;
            tracing::debug!(
                institution = %reconciler.institution(),
                ?filter,
                pending = records.len(),
                "phase started"
            );

            let mut summary = PhaseSummary::default();
            for record in records.into_iter().filter(|r| r.has_payload()) {
                let key = record.sync_key.clone();
                let result = step(&reconciler, record, &policy);
                summary.record(sink.as_ref(), &key, result);
            }
            Ok(summary)
        })
        .await
        .map_err(|err| RunnerError::Task(format!("{filter:?} phase join error: {err}")))?
    }

    /// Update: bounded fan-out, then wait for every worker.
    async fn update_phase(
        &self,
        reconciler: &Reconciler,
        store: &Arc<dyn RecordStore>,
    ) -> Result<PhaseSummary, RunnerError> {
        let institution = reconciler.institution();
        let (policy, records) = {
            let home = self.home.clone();
            let store = Arc::clone(store);
            let limit = self.settings.update_batch_size;
            tokio::task::spawn_blocking(move || -> Result<_, RunnerError> {
                let policy = registry::load_policy_at(&home, institution)?;
                let records =
                    store.find_pending(PendingFilter::Update, SortOrder::Storage, Some(limit))?;
                Ok((Arc::new(policy), records))
            })
            .await
            .map_err(|err| RunnerError::Task(format!("update query join error: {err}")))??
        };
        tracing::debug!(%institution, pending = records.len(), "update phase started");

        let mut summary = PhaseSummary::default();
        let permits = Arc::new(Semaphore::new(self.settings.update_concurrency.max(1)));
        let mut workers = JoinSet::new();

        for record in records {
            let Some(guard) = self.locks.try_acquire(&record.sync_key) else {
                summary.skip_in_flight(self.sink.as_ref(), institution, &record.sync_key);
                continue;
            };
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|_| RunnerError::ChannelClosed("update worker permits"))?;

            let reconciler = reconciler.clone();
            let policy = Arc::clone(&policy);
            workers.spawn_blocking(move || {
                let _permit = permit;
                let key = guard.key().clone();
                let result = reconciler.update(record, &policy);
                drop(guard);
                (key, result)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((key, result)) => summary.record(self.sink.as_ref(), &key, result),
                Err(err) => {
                    summary.processed += 1;
                    summary.errors += 1;
                    tracing::error!(%institution, error = %err, "update worker failed");
                    self.sink
                        .send(&format!("institution {institution}: update worker failed: {err}"));
                }
            }
        }
        Ok(summary)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("home", &self.home)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
