//! Registry error-message, atomic-write-safety and policy integration tests.
//! Storage: ~/.roster/institutions/<id>/institution.yaml

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use roster_core::{
    registry, settings,
    types::{DestinationConfig, InstitutionId, SyncKey},
    RegistryError,
};
use std::fs;

fn id() -> InstitutionId {
    InstitutionId(17)
}

fn destination() -> DestinationConfig {
    DestinationConfig {
        endpoint: "https://lms.example.org/api".to_string(),
        username: "sync".to_string(),
        password_env: None,
        timeout_secs: 10,
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_institution_names_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = registry::load_institution_at(home.path(), id()).unwrap_err();
    assert!(matches!(err, RegistryError::InstitutionNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("institution not found"));
    assert!(err.to_string().contains("institution.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".roster/institutions/17/institution.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = registry::load_institution_at(home.path(), id()).unwrap_err();
    assert!(matches!(err, RegistryError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("institution.yaml"));
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn save_cleans_up_tmp_file_and_sets_mode() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::add_institution_at(home.path(), id(), "Gesamtschule".to_string(), destination())
        .expect("add");

    home.child(".roster/institutions/17/institution.yaml")
        .assert(predicate::path::exists());
    home.child(".roster/institutions/17/institution.yaml.tmp")
        .assert(predicate::path::missing());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = registry::institution_path_at(home.path(), id());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn mid_write_crash_leaves_original_intact() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    registry::add_institution_at(home.path(), id(), "Gesamtschule".to_string(), destination())
        .expect("add");
    let path = registry::institution_path_at(home.path(), id());
    let original = fs::read(&path).expect("read");

    // Simulate crash: .tmp written but the process died before rename
    fs::write(path.with_file_name("institution.yaml.tmp"), b"CRASH").expect("write tmp");

    let loaded = registry::load_institution_at(home.path(), id()).expect("load");
    assert_eq!(loaded.name, "Gesamtschule");
    assert_eq!(fs::read(&path).expect("read"), original);
}

// ---------------------------------------------------------------------------
// 3. Policy edits are visible to the next load
// ---------------------------------------------------------------------------

#[test]
fn policy_edit_is_picked_up_by_next_snapshot() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut inst =
        registry::add_institution_at(home.path(), id(), "Gesamtschule".to_string(), destination())
            .expect("add");
    assert!(!registry::load_policy_at(home.path(), id()).expect("policy").organization_filter.enabled);

    inst.policy.organization_filter.enabled = true;
    inst.policy.organization_filter.allowed.insert("SchoolA".to_string());
    inst.policy.full_first_name_exceptions.insert(SyncKey::from("k-1"));
    registry::save_institution_at(home.path(), &inst).expect("save");

    let policy = registry::load_policy_at(home.path(), id()).expect("policy");
    assert!(policy.organization_filter.permits("SchoolA"));
    assert!(!policy.organization_filter.permits("SchoolB"));
    assert!(policy.full_first_name_exceptions.contains(&SyncKey::from("k-1")));
}

#[test]
fn handwritten_yaml_uses_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".roster/institutions/17/institution.yaml")
        .write_str(
            "id: 17\n\
             name: Realschule\n\
             destination:\n  endpoint: http://localhost:9000\n  username: sync\n\
             policy:\n  shortening:\n    student_one_letter: true\n\
             created_at: 2024-01-01T00:00:00Z\n\
             updated_at: 2024-01-01T00:00:00Z\n",
        )
        .expect("write");

    let inst = registry::load_institution_at(home.path(), id()).expect("load");
    assert!(inst.enabled);
    assert_eq!(inst.destination.timeout_secs, 30);
    assert!(inst.policy.shortening.student_one_letter);
    assert!(!inst.policy.shortening.teacher_one_letter);
    assert!(inst.policy.teacher_group_patterns.is_empty());
}

// ---------------------------------------------------------------------------
// 4. Settings
// ---------------------------------------------------------------------------

#[test]
fn init_scaffolds_config_yaml() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let (_, created) = settings::init_at(home.path()).expect("init");
    assert!(created);
    home.child(".roster/config.yaml")
        .assert(predicate::str::contains("update_batch_size: 200"));
}
