//! Size-based rotation of the status log.
//!
//! Once `status.log` reaches 10 MiB it is renamed to `status.log.1`, older
//! copies shift up by one and anything past `status.log.5` is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Size at which the status log is rotated (10 MiB).
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated copies kept next to the live log.
pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` once it holds at least `max_bytes`.
///
/// Returns `Ok(true)` when a rotation happened. A log that does not exist
/// yet is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let from = numbered_path(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // Leave an empty live log so appenders never race a missing file.
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;
    Ok(true)
}

/// Rotate `<home>/.roster/logs/status.log` if it has grown too large.
///
/// Failures are logged and otherwise ignored.
pub fn rotate_logs(home: &Path) {
    let status_log = crate::paths::status_log_path(home);
    match rotate_if_needed(&status_log, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %status_log.display(), "status log rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %status_log.display(), error = %err, "status log rotation failed")
        }
    }
}

/// `status.log` → `status.log.<n>`
pub(crate) fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::STATUS_LOG);
    base.with_file_name(format!("{name}.{n}"))
}
