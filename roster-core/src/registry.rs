//! Per-institution YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.roster/
//!   institutions/
//!     <id>/
//!       institution.yaml   (destination + policy: mode 0600)
//!       persons.json       (record store, see `store`)
//!       audit.jsonl        (audit trail, see `store`)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{DestinationConfig, Institution, InstitutionId, InstitutionSyncPolicy};

const INSTITUTION_FILE: &str = "institution.yaml";

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.roster/`
pub fn roster_root(home: &Path) -> PathBuf {
    home.join(".roster")
}

/// `<home>/.roster/institutions/`
pub fn institutions_root(home: &Path) -> PathBuf {
    roster_root(home).join("institutions")
}

/// `<home>/.roster/institutions/<id>/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn institution_dir_at(home: &Path, id: InstitutionId) -> Result<PathBuf, RegistryError> {
    let dir = institutions_root(home).join(id.to_string());
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.roster/institutions/<id>/institution.yaml`: pure, no I/O.
pub fn institution_path_at(home: &Path, id: InstitutionId) -> PathBuf {
    institutions_root(home)
        .join(id.to_string())
        .join(INSTITUTION_FILE)
}

/// Lists the ids of all institution directories, ascending.
///
/// Directory names that are not numeric ids are ignored.
pub fn list_institution_ids_at(home: &Path) -> Result<Vec<InstitutionId>, RegistryError> {
    let dir = institutions_root(home);
    if !dir.exists() {
        return Ok(vec![]);
    }
    let mut ids: Vec<InstitutionId> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|e| e.file_name().to_string_lossy().parse::<u32>().ok())
        .map(InstitutionId)
        .collect();
    ids.sort();
    Ok(ids)
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load a single institution.
///
/// Returns `RegistryError::InstitutionNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn load_institution_at(home: &Path, id: InstitutionId) -> Result<Institution, RegistryError> {
    let path = institution_path_at(home, id);
    if !path.exists() {
        return Err(RegistryError::InstitutionNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse { path, source: e })
}

/// `load_institution_at` convenience wrapper.
pub fn load_institution(id: InstitutionId) -> Result<Institution, RegistryError> {
    load_institution_at(&home()?, id)
}

/// Load the policy snapshot for one institution.
pub fn load_policy_at(
    home: &Path,
    id: InstitutionId,
) -> Result<InstitutionSyncPolicy, RegistryError> {
    Ok(load_institution_at(home, id)?.policy)
}

/// Load every registered institution, sorted by id.
///
/// Directories without an `institution.yaml` are skipped.
pub fn list_institutions_at(home: &Path) -> Result<Vec<Institution>, RegistryError> {
    let mut result = Vec::new();
    for id in list_institution_ids_at(home)? {
        if !institution_path_at(home, id).exists() {
            continue;
        }
        result.push(load_institution_at(home, id)?);
    }
    Ok(result)
}

/// `list_institutions_at` convenience wrapper.
pub fn list_institutions() -> Result<Vec<Institution>, RegistryError> {
    list_institutions_at(&home()?)
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save an institution to `<home>/.roster/institutions/<id>/institution.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_institution_at(home: &Path, institution: &Institution) -> Result<(), RegistryError> {
    institution_dir_at(home, institution.id)?;
    let path = institution_path_at(home, institution.id);
    let tmp_path = path.with_file_name(format!("{INSTITUTION_FILE}.tmp"));

    let yaml = serde_yaml::to_string(institution)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_institution_at` convenience wrapper.
pub fn save_institution(institution: &Institution) -> Result<(), RegistryError> {
    save_institution_at(&home()?, institution)
}

// ---------------------------------------------------------------------------
// 4. Add institution
// ---------------------------------------------------------------------------

/// Register a new institution with a default (permissive) policy.
///
/// Idempotent: if the file already exists, loads and returns it unchanged.
pub fn add_institution_at(
    home: &Path,
    id: InstitutionId,
    name: String,
    destination: DestinationConfig,
) -> Result<Institution, RegistryError> {
    if institution_path_at(home, id).exists() {
        return load_institution_at(home, id);
    }

    let now = Utc::now();
    let institution = Institution {
        id,
        name,
        enabled: true,
        destination,
        policy: InstitutionSyncPolicy::default(),
        created_at: now,
        updated_at: now,
    };
    save_institution_at(home, &institution)?;
    Ok(institution)
}

/// `add_institution_at` convenience wrapper.
pub fn add_institution(
    id: InstitutionId,
    name: String,
    destination: DestinationConfig,
) -> Result<Institution, RegistryError> {
    add_institution_at(&home()?, id, name, destination)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
