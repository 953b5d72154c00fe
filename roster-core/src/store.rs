//! Person record store: pending directory snapshots and the audit trail.
//!
//! [`RecordStore`] is the seam the reconciliation engine writes through.
//! Two implementations ship here:
//!
//! - [`FileRecordStore`]: `<home>/.roster/institutions/<id>/persons.json`
//!   (whole-file atomic rewrite) plus `audit.jsonl` (append-only).
//! - [`MemoryRecordStore`]: same semantics in memory, for dry runs and tests.
//!
//! Both are safe to share between concurrent workers. A [`FileRecordStore`]
//! caches the persons file, so only one process may write an institution at
//! a time: callers hold an [`InstitutionLock`] for as long as the store is
//! open for writing.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::error::{io_err, json_err, StoreError};
use crate::registry::institutions_root;
use crate::types::{AuditEntry, InstitutionId, PersonRecord, SyncKey};

// ---------------------------------------------------------------------------
// Query model
// ---------------------------------------------------------------------------

/// Which pending records a phase asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingFilter {
    /// `to_import` and not errored.
    Import,
    /// `to_delete`, not yet successful, not errored.
    Delete,
    /// `to_update` and not errored.
    Update,
}

impl PendingFilter {
    pub fn matches(&self, record: &PersonRecord) -> bool {
        match self {
            PendingFilter::Import => record.intent.to_import && !record.error,
            PendingFilter::Delete => record.intent.to_delete && !record.success && !record.error,
            PendingFilter::Update => record.intent.to_update && !record.error,
        }
    }
}

/// Result ordering for [`RecordStore::find_pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Oldest `updated_at` first; ties keep storage order.
    UpdatedAt,
    /// Whatever order the store holds records in.
    Storage,
}

/// Generic record store used by the reconciliation engine.
pub trait RecordStore: Send + Sync {
    fn find_pending(
        &self,
        filter: PendingFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<PersonRecord>, StoreError>;

    /// Upsert by sync key. Bumps `updated_at`.
    fn save_person(&self, record: &PersonRecord) -> Result<(), StoreError>;

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

fn select(
    records: &[PersonRecord],
    filter: PendingFilter,
    order: SortOrder,
    limit: Option<usize>,
) -> Vec<PersonRecord> {
    let mut selected: Vec<PersonRecord> = records
        .iter()
        .filter(|r| filter.matches(r))
        .cloned()
        .collect();
    if order == SortOrder::UpdatedAt {
        selected.sort_by_key(|r| r.updated_at);
    }
    if let Some(limit) = limit {
        selected.truncate(limit);
    }
    selected
}

fn upsert(records: &mut Vec<PersonRecord>, record: &PersonRecord) {
    let mut stored = record.clone();
    stored.updated_at = Utc::now();
    match records.iter_mut().find(|r| r.sync_key == record.sync_key) {
        Some(existing) => *existing = stored,
        None => records.push(stored),
    }
}

// ---------------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------------

/// JSON-file backed store for one institution.
#[derive(Debug)]
pub struct FileRecordStore {
    persons_path: PathBuf,
    audit_path: PathBuf,
    persons: Mutex<Vec<PersonRecord>>,
    audit_lock: Mutex<()>,
}

/// `<home>/.roster/institutions/<id>/persons.json`
pub fn persons_path_at(home: &Path, id: InstitutionId) -> PathBuf {
    institutions_root(home)
        .join(id.to_string())
        .join("persons.json")
}

/// `<home>/.roster/institutions/<id>/persons.lock`
pub fn lock_path_at(home: &Path, id: InstitutionId) -> PathBuf {
    institutions_root(home)
        .join(id.to_string())
        .join("persons.lock")
}

/// `<home>/.roster/institutions/<id>/audit.jsonl`
pub fn audit_path_at(home: &Path, id: InstitutionId) -> PathBuf {
    institutions_root(home)
        .join(id.to_string())
        .join("audit.jsonl")
}

impl FileRecordStore {
    /// Open the store for `id`. A missing persons file is an empty store.
    pub fn open_at(home: &Path, id: InstitutionId) -> Result<Self, StoreError> {
        let persons_path = persons_path_at(home, id);
        let persons = if persons_path.exists() {
            let contents =
                std::fs::read_to_string(&persons_path).map_err(|e| io_err(&persons_path, e))?;
            serde_json::from_str(&contents).map_err(|e| json_err(&persons_path, e))?
        } else {
            Vec::new()
        };
        Ok(Self {
            audit_path: audit_path_at(home, id),
            persons_path,
            persons: Mutex::new(persons),
            audit_lock: Mutex::new(()),
        })
    }

    /// Snapshot of every record, in storage order.
    pub fn records(&self) -> Result<Vec<PersonRecord>, StoreError> {
        Ok(self.persons.lock().map_err(|_| StoreError::Poisoned)?.clone())
    }

    pub fn get(&self, sync_key: &SyncKey) -> Result<Option<PersonRecord>, StoreError> {
        let persons = self.persons.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(persons.iter().find(|r| &r.sync_key == sync_key).cloned())
    }

    /// Every audit entry written so far, oldest first.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        read_audit_file(&self.audit_path)
    }

    fn persist(&self, persons: &[PersonRecord]) -> Result<(), StoreError> {
        let path = &self.persons_path;
        let Some(dir) = path.parent() else {
            return Err(io_err(path, std::io::Error::other("invalid persons path")));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let json = serde_json::to_string_pretty(persons).map_err(|e| json_err(path, e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(path, e));
        }
        Ok(())
    }
}

impl RecordStore for FileRecordStore {
    fn find_pending(
        &self,
        filter: PendingFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<PersonRecord>, StoreError> {
        let persons = self.persons.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(select(&persons, filter, order, limit))
    }

    fn save_person(&self, record: &PersonRecord) -> Result<(), StoreError> {
        let mut persons = self.persons.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = persons.clone();
        upsert(&mut next, record);
        self.persist(&next)?;
        *persons = next;
        Ok(())
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let _guard = self.audit_lock.lock().map_err(|_| StoreError::Poisoned)?;
        let path = &self.audit_path;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut line = serde_json::to_string(entry).map_err(|e| json_err(path, e))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| io_err(path, e))
    }
}

/// Read an `audit.jsonl` file. A missing file has no entries; blank lines
/// are skipped.
pub fn read_audit_file(path: &Path) -> Result<Vec<AuditEntry>, StoreError> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(path, err)),
    };
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line).map_err(|e| json_err(path, e))?);
    }
    Ok(entries)
}

// ---------------------------------------------------------------------------
// Institution lock
// ---------------------------------------------------------------------------

/// Exclusive `flock` on an institution's `persons.lock`. Released when
/// dropped or when the holding process exits.
#[derive(Debug)]
pub struct InstitutionLock {
    _file: File,
    path: PathBuf,
}

impl InstitutionLock {
    /// Non-blocking. `Ok(None)` if another run holds the institution.
    pub fn try_acquire_at(home: &Path, id: InstitutionId) -> Result<Option<Self>, StoreError> {
        let path = lock_path_at(home, id);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;

        match try_flock_exclusive(&file) {
            Ok(true) => Ok(Some(Self { _file: file, path })),
            Ok(false) => Ok(None),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    persons: Vec<PersonRecord>,
    audit: Vec<AuditEntry>,
}

/// In-memory store. Records keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without touching `updated_at`.
    pub fn with_records(records: impl IntoIterator<Item = PersonRecord>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                persons: records.into_iter().collect(),
                audit: Vec::new(),
            }),
        }
    }

    pub fn records(&self) -> Vec<PersonRecord> {
        self.state
            .lock()
            .map(|s| s.persons.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, sync_key: &SyncKey) -> Option<PersonRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.persons.iter().find(|r| &r.sync_key == sync_key).cloned())
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.state
            .lock()
            .map(|s| s.audit.clone())
            .unwrap_or_default()
    }
}

impl RecordStore for MemoryRecordStore {
    fn find_pending(
        &self,
        filter: PendingFilter,
        order: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<PersonRecord>, StoreError> {
        let state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(select(&state.persons, filter, order, limit))
    }

    fn save_person(&self, record: &PersonRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        upsert(&mut state.persons, record);
        Ok(())
    }

    fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        state.audit.push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
