//! Operational status lines for humans.
//!
//! Nothing here feeds back into reconciliation: a sink that cannot write
//! logs a warning and drops the lines.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::log_rotation::{rotate_if_needed, MAX_LOG_BYTES, MAX_ROTATED_FILES};

/// Buffered lines written out per flush.
const FLUSH_THRESHOLD: usize = 64;

/// Accepts free-text status lines. Shared by every update worker.
pub trait LogSink: Send + Sync {
    fn send(&self, line: &str);

    /// Push buffered lines out. The default sink has nothing to flush.
    fn flush(&self) {}
}

/// Forwards every line to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn send(&self, line: &str) {
        tracing::info!(target: "roster::status", "{line}");
    }
}

/// Appends lines to `<home>/.roster/logs/status.log`.
///
/// Lines are buffered behind a single mutex and written in batches; the log
/// is rotated by size before each write.
#[derive(Debug)]
pub struct FileLogSink {
    path: PathBuf,
    service_name: String,
    buffer: Mutex<Vec<String>>,
}

impl FileLogSink {
    pub fn new(path: impl Into<PathBuf>, service_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            service_name: service_name.into(),
            buffer: Mutex::new(Vec::new()),
        }
    }

    /// Sink for the status log under `home`.
    pub fn at_home(home: &Path, service_name: impl Into<String>) -> Self {
        Self::new(crate::paths::status_log_path(home), service_name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_lines(&self, lines: &[String]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        rotate_if_needed(&self.path, MAX_LOG_BYTES, MAX_ROTATED_FILES)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for line in lines {
            writeln!(file, "{line}")?;
        }
        file.flush()
    }
}

impl LogSink for FileLogSink {
    fn send(&self, line: &str) {
        let stamped = format!(
            "{} [{}] {line}",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.service_name
        );
        let full = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(stamped);
            buffer.len() >= FLUSH_THRESHOLD
        };
        if full {
            self.flush();
        }
    }

    fn flush(&self) {
        let lines = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        if lines.is_empty() {
            return;
        }
        if let Err(err) = self.write_lines(&lines) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                dropped = lines.len(),
                "status log write failed"
            );
        }
    }
}

impl Drop for FileLogSink {
    fn drop(&mut self) {
        self.flush();
    }
}
