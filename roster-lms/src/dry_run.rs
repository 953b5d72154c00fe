//! Dry-run destination: records every call, changes nothing, never fails.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

use roster_core::{
    DirectoryClient, Group, Membership, NewGroup, NewPerson, PersonAttribute, RemoteError,
    SyncKey,
};

/// One call the engine would have made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DryRunCall {
    CreatePerson {
        sync_key: SyncKey,
        username: String,
        profile: String,
    },
    DeletePerson {
        sync_key: SyncKey,
    },
    UpdateAttribute {
        sync_key: SyncKey,
        attribute: PersonAttribute,
        value: String,
    },
    CreateGroup {
        name: String,
        parent_id: String,
    },
    CreateMembership {
        group_id: String,
        sync_key: SyncKey,
        role: String,
    },
    DeleteMembership {
        membership_id: String,
    },
}

impl fmt::Display for DryRunCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DryRunCall::CreatePerson {
                sync_key,
                username,
                profile,
            } => write!(f, "create person {username} ({sync_key}) as {profile}"),
            DryRunCall::DeletePerson { sync_key } => write!(f, "delete person {sync_key}"),
            DryRunCall::UpdateAttribute {
                sync_key,
                attribute,
                value,
            } => write!(f, "set {attribute} of {sync_key} to {value:?}"),
            DryRunCall::CreateGroup { name, parent_id } => {
                write!(f, "create group {name} under {parent_id}")
            }
            DryRunCall::CreateMembership {
                group_id,
                sync_key,
                role,
            } => write!(f, "add {sync_key} to {group_id} as {role:?}"),
            DryRunCall::DeleteMembership { membership_id } => {
                write!(f, "remove membership {membership_id}")
            }
        }
    }
}

/// Destination stand-in for `roster sync --dry-run`.
///
/// Groups created earlier in the same run are reported as present, so the
/// recorded plan creates each group once. Existing memberships are never
/// known, so membership teardown records nothing.
#[derive(Debug, Default)]
pub struct DryRunDirectory {
    calls: Mutex<Vec<DryRunCall>>,
    created_groups: Mutex<BTreeSet<String>>,
}

impl DryRunDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<DryRunCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn push(&self, call: DryRunCall) -> Result<(), RemoteError> {
        tracing::info!("[dry-run] would {call}");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
        Ok(())
    }
}

impl DirectoryClient for DryRunDirectory {
    fn create_person(&self, person: &NewPerson) -> Result<(), RemoteError> {
        self.push(DryRunCall::CreatePerson {
            sync_key: person.sync_key.clone(),
            username: person.username.clone(),
            profile: person.profile.clone(),
        })
    }

    fn delete_person(&self, sync_key: &SyncKey) -> Result<(), RemoteError> {
        self.push(DryRunCall::DeletePerson {
            sync_key: sync_key.clone(),
        })
    }

    fn update_attribute(
        &self,
        sync_key: &SyncKey,
        attribute: PersonAttribute,
        value: &str,
    ) -> Result<(), RemoteError> {
        self.push(DryRunCall::UpdateAttribute {
            sync_key: sync_key.clone(),
            attribute,
            value: value.to_string(),
        })
    }

    fn read_group(&self, name: &str) -> Result<Option<Group>, RemoteError> {
        let known = self
            .created_groups
            .lock()
            .map(|groups| groups.contains(name))
            .unwrap_or(false);
        Ok(known.then(|| Group {
            id: name.to_string(),
            name: name.to_string(),
        }))
    }

    fn create_group(&self, group: &NewGroup) -> Result<(), RemoteError> {
        if let Ok(mut groups) = self.created_groups.lock() {
            groups.insert(group.name.clone());
        }
        self.push(DryRunCall::CreateGroup {
            name: group.name.clone(),
            parent_id: group.parent_id.clone(),
        })
    }

    fn create_membership(
        &self,
        group_id: &str,
        sync_key: &SyncKey,
        role: &str,
    ) -> Result<(), RemoteError> {
        self.push(DryRunCall::CreateMembership {
            group_id: group_id.to_string(),
            sync_key: sync_key.clone(),
            role: role.to_string(),
        })
    }

    fn delete_membership(&self, membership_id: &str) -> Result<(), RemoteError> {
        self.push(DryRunCall::DeleteMembership {
            membership_id: membership_id.to_string(),
        })
    }

    fn list_memberships(&self, _sync_key: &SyncKey) -> Result<Vec<Membership>, RemoteError> {
        Ok(vec![])
    }
}
