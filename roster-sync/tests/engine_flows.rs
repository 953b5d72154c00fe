//! Import / delete / update flows against a recording destination.

mod common;

use common::{harness, student, Call, TOMBSTONE_PAYLOAD};
use roster_core::types::OrganizationFilter;
use roster_core::{
    AuditAction, InstitutionSyncPolicy, NewGroup, PersonAttribute, PersonRecord, SyncKey,
    UpdateFlags,
};
use roster_sync::{ensure_group, Outcome};
use rstest::rstest;

fn only_school_a() -> InstitutionSyncPolicy {
    InstitutionSyncPolicy {
        organization_filter: OrganizationFilter {
            enabled: true,
            allowed: ["SchoolA".to_string()].into_iter().collect(),
        },
        ..Default::default()
    }
}

fn stored(h: &common::Harness, key: &str) -> PersonRecord {
    h.store.get(&SyncKey::from(key)).expect("record saved")
}

// ---------------------------------------------------------------------------
// 1. Import
// ---------------------------------------------------------------------------

#[test]
fn import_creates_person_org_and_group_memberships() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;

    let report = h
        .reconciler
        .import(r, &InstitutionSyncPolicy::default())
        .expect("import");
    assert_eq!(report.outcome, Outcome::Succeeded);

    let calls = h.client.calls();
    match &calls[0] {
        Call::CreatePerson(p) => {
            assert_eq!(p.first_name, "Anna Maria");
            assert_eq!(p.profile, "Student");
        }
        other => panic!("expected create_person first, got {other:?}"),
    }
    assert!(calls.contains(&Call::CreateGroup(NewGroup::organization("SchoolA"))));
    assert!(calls.contains(&Call::CreateGroup(NewGroup::under_organization("5a", "SchoolA"))));
    assert_eq!(
        h.client.memberships_created(),
        vec![
            ("SchoolA".to_string(), "Student".to_string()),
            ("5a".to_string(), "Student".to_string()),
        ]
    );

    let saved = stored(&h, "k-anna");
    assert!(saved.is_settled() && saved.success);
    assert!(!saved.intent.to_import);
    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Import);
    assert!(audit[0].success);
}

#[test]
fn create_person_failure_stops_import_and_audits_once() {
    let h = harness();
    h.client.fail("create_person");
    let mut r = student();
    r.intent.to_import = true;

    let report = h
        .reconciler
        .import(r, &InstitutionSyncPolicy::default())
        .expect("import");
    assert!(report.outcome.is_failure());
    assert!(h.client.memberships_created().is_empty());

    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Import);
    assert!(!audit[0].success);
    assert!(audit[0].error_message.contains("create_person"));

    let saved = stored(&h, "k-anna");
    assert!(saved.error && saved.intent.to_import);
}

#[test]
fn organization_filter_scenario_only_school_a_propagated() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;
    r.organization_memberships = r#"{"SchoolA": "Student", "SchoolB": "Student"}"#.to_string();
    r.group_memberships = "{}".to_string();

    h.reconciler.import(r, &only_school_a()).expect("import");

    let orgs: Vec<String> = h
        .client
        .memberships_created()
        .into_iter()
        .map(|(g, _)| g)
        .collect();
    assert_eq!(orgs, vec!["SchoolA"]);
    assert!(!h
        .client
        .calls()
        .contains(&Call::CreateGroup(NewGroup::organization("SchoolB"))));
}

#[test]
fn ineligible_person_is_settled_as_success_without_calls() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;
    r.organization_memberships = r#"{"SchoolB": "Student"}"#.to_string();

    let report = h.reconciler.import(r, &only_school_a()).expect("import");
    assert_eq!(report.outcome, Outcome::NotEligible);
    assert!(h.client.calls().is_empty());
    assert!(stored(&h, "k-anna").success);
}

#[test]
fn malformed_memberships_settle_as_error_without_calls() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;
    r.group_memberships = "not json".to_string();

    let report = h
        .reconciler
        .import(r, &InstitutionSyncPolicy::default())
        .expect("import");
    assert!(matches!(report.outcome, Outcome::Failed { .. }));
    assert!(h.client.calls().is_empty());
    let saved = stored(&h, "k-anna");
    assert!(saved.error);
    assert!(saved.error_message.contains("group memberships"));
}

#[test]
fn admin_override_gets_no_groups_and_administrator_roles() {
    let h = harness();
    let policy = InstitutionSyncPolicy {
        admin_override_enabled: true,
        admin_last_names: vec!["#Admin".to_string()],
        ..Default::default()
    };
    let mut r = student();
    r.intent.to_import = true;
    r.last_name = "#Admin".to_string();
    r.organization_memberships = r#"{"SchoolA": "Staff", "SchoolC": "Student"}"#.to_string();
    r.group_memberships = r#"{"5a": "SchoolA", "lehrer": "SchoolC"}"#.to_string();

    h.reconciler.import(r, &policy).expect("import");

    let created = h.client.memberships_created();
    assert_eq!(created.len(), 2, "only organization memberships: {created:?}");
    assert!(created.iter().all(|(_, role)| role == "Administrator"));
    assert!(created.iter().all(|(g, _)| g.starts_with("School")));
    match &h.client.calls()[0] {
        Call::CreatePerson(p) => assert_eq!(p.profile, "Administrator"),
        other => panic!("unexpected first call {other:?}"),
    }
}

#[test]
fn group_membership_uses_owning_organization_role() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;
    r.organization_memberships = r#"{"SchoolA": "Staff"}"#.to_string();
    r.group_memberships = r#"{"lehrer-a": "SchoolA", "orphan": "SchoolX"}"#.to_string();

    h.reconciler
        .import(r, &InstitutionSyncPolicy::default())
        .expect("import");

    let created = h.client.memberships_created();
    assert!(created.contains(&("lehrer-a".to_string(), "Staff".to_string())));
    assert!(created.contains(&("orphan".to_string(), String::new())));
}

// ---------------------------------------------------------------------------
// 2. Ineligible group organizations: Import aborts, Update skips
// ---------------------------------------------------------------------------

fn mixed_groups(r: &mut PersonRecord) {
    r.organization_memberships = r#"{"SchoolA": "Student"}"#.to_string();
    // BTreeMap order: "a-other" (SchoolB) comes before "b-class" (SchoolA).
    r.group_memberships = r#"{"a-other": "SchoolB", "b-class": "SchoolA"}"#.to_string();
}

#[test]
fn import_group_loop_stops_at_ineligible_organization() {
    let h = harness();
    let mut r = student();
    r.intent.to_import = true;
    mixed_groups(&mut r);

    let report = h.reconciler.import(r, &only_school_a()).expect("import");
    assert_eq!(report.outcome, Outcome::Succeeded);
    let groups: Vec<String> = h
        .client
        .memberships_created()
        .into_iter()
        .map(|(g, _)| g)
        .collect();
    assert_eq!(groups, vec!["SchoolA"]);
}

#[test]
fn update_group_loop_skips_ineligible_organization() {
    let h = harness();
    let mut r = student();
    r.intent.to_update = true;
    r.updates.group_memberships = true;
    mixed_groups(&mut r);

    let report = h.reconciler.update(r, &only_school_a()).expect("update");
    assert_eq!(report.outcome, Outcome::Succeeded);
    let groups: Vec<String> = h
        .client
        .memberships_created()
        .into_iter()
        .map(|(g, _)| g)
        .collect();
    assert_eq!(groups, vec!["SchoolA", "b-class"]);
}

// ---------------------------------------------------------------------------
// 3. Tombstones and stale instructions
// ---------------------------------------------------------------------------

#[rstest]
#[case::import(AuditAction::Import)]
#[case::update(AuditAction::Update)]
fn tombstone_redirects_to_delete_without_calls(#[case] entry: AuditAction) {
    let h = harness();
    let mut r = student();
    r.raw_data = TOMBSTONE_PAYLOAD.to_string();
    r.updates = UpdateFlags::all_supported();
    let report = match entry {
        AuditAction::Import => {
            r.intent.to_import = true;
            h.reconciler.import(r, &InstitutionSyncPolicy::default())
        }
        _ => {
            r.intent.to_update = true;
            h.reconciler.update(r, &InstitutionSyncPolicy::default())
        }
    }
    .expect("flow");

    assert_eq!(
        report.outcome,
        Outcome::Redirected {
            to: AuditAction::Delete
        }
    );
    assert!(h.client.mutations().is_empty());
    assert!(h.store.audit_entries().is_empty());

    let saved = stored(&h, "k-anna");
    assert!(saved.intent.to_delete && !saved.intent.to_import && !saved.intent.to_update);
    assert!(!saved.updates.any());
    assert!(!saved.success && !saved.error);
}

#[test]
fn tombstoned_delete_calls_destination_and_keeps_flag() {
    let h = harness();
    let mut r = student();
    r.raw_data = TOMBSTONE_PAYLOAD.to_string();
    r.intent.to_delete = true;

    let report = h.reconciler.delete(r).expect("delete");
    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(
        h.client.mutations(),
        vec![Call::DeletePerson(SyncKey::from("k-anna"))]
    );
    let saved = stored(&h, "k-anna");
    assert!(saved.intent.to_delete && saved.success);
    assert!(saved.is_settled());
}

#[test]
fn failed_delete_is_audited() {
    let h = harness();
    h.client.fail("delete_person");
    let mut r = student();
    r.raw_data = TOMBSTONE_PAYLOAD.to_string();
    r.intent.to_delete = true;

    h.reconciler.delete(r).expect("delete");
    let audit = h.store.audit_entries();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::Delete);
    assert!(!audit[0].success);
    assert!(stored(&h, "k-anna").error);
}

#[test]
fn stale_delete_is_rescheduled_as_full_update() {
    let h = harness();
    let mut r = student();
    r.intent.to_delete = true;

    let report = h.reconciler.delete(r).expect("delete");
    assert_eq!(
        report.outcome,
        Outcome::Redirected {
            to: AuditAction::Update
        }
    );
    assert!(h.client.calls().is_empty());
    assert!(h.store.audit_entries().is_empty());

    let saved = stored(&h, "k-anna");
    assert!(saved.intent.to_update && !saved.intent.to_delete);
    assert_eq!(saved.updates, UpdateFlags::all_supported());
}

// ---------------------------------------------------------------------------
// 4. Update
// ---------------------------------------------------------------------------

#[test]
fn update_always_sends_first_name() {
    let h = harness();
    let mut r = student();
    r.intent.to_update = true;

    h.reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");
    assert_eq!(
        h.client.mutations(),
        vec![Call::UpdateAttribute(
            PersonAttribute::FirstName,
            "Anna Maria".to_string()
        )]
    );
    assert!(stored(&h, "k-anna").is_settled());
}

#[test]
fn malformed_group_payload_fails_update_without_membership_flags() {
    let h = harness();
    let mut r = student();
    r.intent.to_update = true;
    r.group_memberships = "not json".to_string();

    let report = h
        .reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");
    assert!(matches!(report.outcome, Outcome::Failed { .. }));
    assert!(h.client.mutations().is_empty());
    let saved = stored(&h, "k-anna");
    assert!(saved.error && saved.intent.to_update);
    assert!(saved.error_message.contains("group memberships"));
}

#[test]
fn update_applies_fields_in_fixed_order() {
    let h = harness();
    let mut r = student();
    r.intent.to_update = true;
    r.updates.email = true;
    r.updates.profile = true;
    r.updates.last_name = true;
    r.updates.username = true;

    h.reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");
    let order: Vec<&'static str> = h
        .client
        .mutations()
        .iter()
        .map(|c| match c {
            Call::UpdateAttribute(attr, _) => attr.as_str(),
            Call::CreatePerson(_) => "profile",
            _ => "other",
        })
        .collect();
    assert_eq!(
        order,
        vec!["first_name", "last_name", "username", "profile", "email"]
    );
}

#[test]
fn update_failure_aborts_remaining_steps() {
    let h = harness();
    h.client.fail("update_attribute");
    let mut r = student();
    r.intent.to_update = true;
    r.updates = UpdateFlags::all_supported();

    let report = h
        .reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");
    assert!(report.outcome.is_failure());
    assert_eq!(h.client.mutations().len(), 1);
    let saved = stored(&h, "k-anna");
    assert!(saved.error && saved.intent.to_update);
    assert!(!saved.updates.any());
}

#[test]
fn membership_update_tears_down_before_recreating() {
    let h = harness();
    h.client.with_memberships(3);
    let mut r = student();
    r.intent.to_update = true;
    r.updates.group_memberships = true;

    h.reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");

    let calls = h.client.mutations();
    let deletes: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::DeleteMembership(_)))
        .map(|(i, _)| i)
        .collect();
    let first_create = calls
        .iter()
        .position(|c| matches!(c, Call::CreateMembership { .. }))
        .expect("memberships recreated");
    assert_eq!(deletes.len(), 3);
    assert!(deletes.iter().all(|&i| i < first_create));
}

#[test]
fn empty_payload_update_is_reported_but_not_persisted() {
    let h = harness();
    let mut r = student();
    r.intent.to_update = true;
    r.raw_data.clear();

    let report = h
        .reconciler
        .update(r, &InstitutionSyncPolicy::default())
        .expect("update");
    assert_eq!(report.outcome, Outcome::EmptyPayload);
    assert!(h.store.get(&SyncKey::from("k-anna")).is_none());
    assert!(h.store.audit_entries().is_empty());
    assert!(h.client.calls().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Destination-side idempotence
// ---------------------------------------------------------------------------

#[test]
fn ensure_group_twice_creates_once() {
    let h = harness();
    let group = NewGroup::organization("SchoolA");
    ensure_group(h.client.as_ref(), &group).expect("first");
    ensure_group(h.client.as_ref(), &group).expect("second");
    let creates = h
        .client
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CreateGroup(_)))
        .count();
    assert_eq!(creates, 1);
}

#[test]
fn existing_organization_is_not_recreated() {
    let h = harness();
    h.client.with_group("SchoolA");
    h.client.with_group("5a");
    let mut r = student();
    r.intent.to_import = true;
    h.reconciler
        .import(r, &InstitutionSyncPolicy::default())
        .expect("import");
    assert!(!h
        .client
        .calls()
        .iter()
        .any(|c| matches!(c, Call::CreateGroup(_))));
}

// ---------------------------------------------------------------------------
// 6. Settled invariant
// ---------------------------------------------------------------------------

#[rstest]
#[case::import_ok(AuditAction::Import, None)]
#[case::import_err(AuditAction::Import, Some("create_person"))]
#[case::update_ok(AuditAction::Update, None)]
#[case::update_err(AuditAction::Update, Some("create_membership"))]
#[case::delete_ok(AuditAction::Delete, None)]
#[case::delete_err(AuditAction::Delete, Some("delete_person"))]
fn every_settled_record_has_one_outcome_and_no_flags(
    #[case] action: AuditAction,
    #[case] failing: Option<&'static str>,
) {
    let h = harness();
    if let Some(op) = failing {
        h.client.fail(op);
    }
    let policy = InstitutionSyncPolicy::default();
    let mut r = student();
    r.updates = UpdateFlags::all_supported();
    match action {
        AuditAction::Import => {
            r.intent.to_import = true;
            h.reconciler.import(r, &policy).expect("import");
        }
        AuditAction::Update => {
            r.intent.to_update = true;
            h.reconciler.update(r, &policy).expect("update");
        }
        AuditAction::Delete => {
            r.intent.to_delete = true;
            r.raw_data = TOMBSTONE_PAYLOAD.to_string();
            h.reconciler.delete(r).expect("delete");
        }
    }
    let saved = stored(&h, "k-anna");
    assert!(saved.is_settled(), "{saved:?}");
    assert_eq!(saved.error, failing.is_some());
}
