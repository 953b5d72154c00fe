//! Global settings (`~/.roster/config.yaml`) and the run marker
//! (`~/.roster/run.json`).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::registry::{home, roster_root, set_file_permissions};

pub const DEFAULT_DELETE_BATCH: usize = 500;
pub const DEFAULT_UPDATE_BATCH: usize = 200;
pub const DEFAULT_UPDATE_CONCURRENCY: usize = 16;
pub const DEFAULT_SERVICE_NAME: &str = "person-sync";

/// Batch sizes and worker limits shared by every institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSettings {
    #[serde(default = "default_delete_batch")]
    pub delete_batch_size: usize,
    #[serde(default = "default_update_batch")]
    pub update_batch_size: usize,
    /// Upper bound on concurrent update workers per institution.
    #[serde(default = "default_update_concurrency")]
    pub update_concurrency: usize,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for RosterSettings {
    fn default() -> Self {
        Self {
            delete_batch_size: DEFAULT_DELETE_BATCH,
            update_batch_size: DEFAULT_UPDATE_BATCH,
            update_concurrency: DEFAULT_UPDATE_CONCURRENCY,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

fn default_delete_batch() -> usize {
    DEFAULT_DELETE_BATCH
}
fn default_update_batch() -> usize {
    DEFAULT_UPDATE_BATCH
}
fn default_update_concurrency() -> usize {
    DEFAULT_UPDATE_CONCURRENCY
}
fn default_service_name() -> String {
    DEFAULT_SERVICE_NAME.to_string()
}

/// Last run of the service, written at the start of every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMarker {
    pub service_name: String,
    pub last_run_at: DateTime<Utc>,
}

/// `<home>/.roster/config.yaml`
pub fn settings_path_at(home: &Path) -> PathBuf {
    roster_root(home).join("config.yaml")
}

/// `<home>/.roster/run.json`
pub fn run_marker_path_at(home: &Path) -> PathBuf {
    roster_root(home).join("run.json")
}

/// Load settings; a missing file yields the defaults.
pub fn load_at(home: &Path) -> Result<RosterSettings, RegistryError> {
    let path = settings_path_at(home);
    if !path.exists() {
        return Ok(RosterSettings::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<RosterSettings, RegistryError> {
    load_at(&home()?)
}

/// Atomically write settings (`.tmp` + rename, mode 0600).
pub fn save_at(home: &Path, settings: &RosterSettings) -> Result<(), RegistryError> {
    let path = settings_path_at(home);
    std::fs::create_dir_all(roster_root(home))?;
    let tmp = path.with_file_name("config.yaml.tmp");
    std::fs::write(&tmp, serde_yaml::to_string(settings)?)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// Write default settings unless a config file already exists.
///
/// Returns the effective settings and whether a file was created.
pub fn init_at(home: &Path) -> Result<(RosterSettings, bool), RegistryError> {
    if settings_path_at(home).exists() {
        return Ok((load_at(home)?, false));
    }
    let settings = RosterSettings::default();
    save_at(home, &settings)?;
    Ok((settings, true))
}

/// Record the start of a run.
pub fn record_run_at(
    home: &Path,
    service_name: &str,
    now: DateTime<Utc>,
) -> Result<RunMarker, RegistryError> {
    let marker = RunMarker {
        service_name: service_name.to_string(),
        last_run_at: now,
    };
    let path = run_marker_path_at(home);
    std::fs::create_dir_all(roster_root(home))?;
    let json = serde_json::to_string_pretty(&marker).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    Ok(marker)
}

/// Read the run marker, if any run has happened yet.
pub fn load_run_marker_at(home: &Path) -> Result<Option<RunMarker>, RegistryError> {
    let path = run_marker_path_at(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path)?;
    let marker = serde_json::from_str(&contents).map_err(std::io::Error::other)?;
    Ok(Some(marker))
}
