use std::path::{Path, PathBuf};
use std::time::Duration;

use roster_core::registry::roster_root;

pub const STATUS_LOG: &str = "status.log";

/// How often the periodic runner checks the status log size.
pub const ROTATION_INTERVAL: Duration = Duration::from_secs(30);

pub fn logs_dir(home: &Path) -> PathBuf {
    roster_root(home).join("logs")
}

pub fn status_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(STATUS_LOG)
}
