//! Recording destination client with per-operation failure injection.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};

use roster_core::{
    DirectoryClient, Group, InstitutionId, MemoryRecordStore, Membership, NewGroup, NewPerson,
    PersonAttribute, PersonRecord, RemoteError, SyncKey,
};
use roster_sync::Reconciler;

pub const LIVE_PAYLOAD: &str = r#"{"dn": "uid=jdoe", "object": {"uid": "jdoe"}}"#;
pub const TOMBSTONE_PAYLOAD: &str = r#"{"dn": "uid=jdoe", "object": null, "options": []}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreatePerson(NewPerson),
    DeletePerson(SyncKey),
    UpdateAttribute(PersonAttribute, String),
    ReadGroup(String),
    CreateGroup(NewGroup),
    CreateMembership { group: String, role: String },
    DeleteMembership(String),
    ListMemberships(SyncKey),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::ReadGroup(_) | Call::ListMemberships(_))
    }
}

#[derive(Debug, Default)]
pub struct FakeDirectory {
    calls: Mutex<Vec<Call>>,
    groups: Mutex<BTreeSet<String>>,
    existing_memberships: Mutex<Vec<Membership>>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FakeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call to `operation` fail.
    pub fn fail(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn with_group(&self, name: &str) {
        self.groups.lock().unwrap().insert(name.to_string());
    }

    pub fn with_memberships(&self, count: usize) {
        let mut existing = self.existing_memberships.lock().unwrap();
        for i in 0..count {
            existing.push(Membership {
                id: format!("m-{i}"),
                group_id: format!("g-{i}"),
                role: "Student".to_string(),
            });
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn memberships_created(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::CreateMembership { group, role } => Some((group, role)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, operation: &'static str, call: Call) -> Result<(), RemoteError> {
        self.calls.lock().unwrap().push(call);
        if self.failing.lock().unwrap().contains(operation) {
            return Err(RemoteError::new(operation, "injected failure"));
        }
        Ok(())
    }
}

impl DirectoryClient for FakeDirectory {
    fn create_person(&self, person: &NewPerson) -> Result<(), RemoteError> {
        self.record("create_person", Call::CreatePerson(person.clone()))
    }

    fn delete_person(&self, sync_key: &SyncKey) -> Result<(), RemoteError> {
        self.record("delete_person", Call::DeletePerson(sync_key.clone()))
    }

    fn update_attribute(
        &self,
        _sync_key: &SyncKey,
        attribute: PersonAttribute,
        value: &str,
    ) -> Result<(), RemoteError> {
        self.record(
            "update_attribute",
            Call::UpdateAttribute(attribute, value.to_string()),
        )
    }

    fn read_group(&self, name: &str) -> Result<Option<Group>, RemoteError> {
        self.record("read_group", Call::ReadGroup(name.to_string()))?;
        Ok(self.groups.lock().unwrap().get(name).map(|n| Group {
            id: n.clone(),
            name: n.clone(),
        }))
    }

    fn create_group(&self, group: &NewGroup) -> Result<(), RemoteError> {
        self.record("create_group", Call::CreateGroup(group.clone()))?;
        self.groups.lock().unwrap().insert(group.name.clone());
        Ok(())
    }

    fn create_membership(
        &self,
        group_id: &str,
        _sync_key: &SyncKey,
        role: &str,
    ) -> Result<(), RemoteError> {
        self.record(
            "create_membership",
            Call::CreateMembership {
                group: group_id.to_string(),
                role: role.to_string(),
            },
        )
    }

    fn delete_membership(&self, membership_id: &str) -> Result<(), RemoteError> {
        self.record(
            "delete_membership",
            Call::DeleteMembership(membership_id.to_string()),
        )
    }

    fn list_memberships(&self, sync_key: &SyncKey) -> Result<Vec<Membership>, RemoteError> {
        self.record("list_memberships", Call::ListMemberships(sync_key.clone()))?;
        Ok(self.existing_memberships.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub store: Arc<MemoryRecordStore>,
    pub client: Arc<FakeDirectory>,
    pub reconciler: Reconciler,
}

pub fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryRecordStore::new());
    let client = FakeDirectory::new();
    let reconciler = Reconciler::new(InstitutionId(7), store.clone(), client.clone());
    Harness {
        store,
        client,
        reconciler,
    }
}

/// A Student in SchoolA with one class group and a live payload.
pub fn student() -> PersonRecord {
    let mut r = PersonRecord::new("k-anna", "anna");
    r.first_name = "Anna Maria".to_string();
    r.last_name = "Schmidt".to_string();
    r.email = "anna@example.org".to_string();
    r.profile = "Student".to_string();
    r.organization_memberships = r#"{"SchoolA": "Student"}"#.to_string();
    r.group_memberships = r#"{"5a": "SchoolA"}"#.to_string();
    r.raw_data = LIVE_PAYLOAD.to_string();
    r
}
