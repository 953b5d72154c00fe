//! Destination directory client interface.
//!
//! The destination LMS is a remote service exposing persons, groups and
//! memberships. Implementations live in `roster-lms`; the reconciliation
//! engine only sees this trait.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::SyncKey;

/// Failure of a single remote call. Always fatal to the current flow step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct RemoteError {
    /// Name of the destination operation, e.g. `create_person`.
    pub operation: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Person attributes that can be patched individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonAttribute {
    FirstName,
    LastName,
    Username,
    Email,
}

impl PersonAttribute {
    /// Wire name of the attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonAttribute::FirstName => "first_name",
            PersonAttribute::LastName => "last_name",
            PersonAttribute::Username => "username",
            PersonAttribute::Email => "email",
        }
    }
}

impl fmt::Display for PersonAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full person payload for `create_person`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPerson {
    pub sync_key: SyncKey,
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub profile: String,
    pub email: String,
}

/// Group or organization to create. Organizations are top-level groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub sync_id: String,
    pub name: String,
    pub parent_id: String,
    pub level: u32,
    pub top_level: bool,
}

impl NewGroup {
    /// Parent id used for top-level groups.
    pub const ROOT_PARENT: &'static str = "0";

    /// Organization: top-level, level 0, identified by its name.
    pub fn organization(name: &str) -> Self {
        Self {
            sync_id: name.to_string(),
            name: name.to_string(),
            parent_id: Self::ROOT_PARENT.to_string(),
            level: 0,
            top_level: true,
        }
    }

    /// Group parented under its owning organization, level 1.
    pub fn under_organization(name: &str, organization: &str) -> Self {
        Self {
            sync_id: name.to_string(),
            name: name.to_string(),
            parent_id: organization.to_string(),
            level: 1,
            top_level: false,
        }
    }
}

/// A group as reported by the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
}

/// One membership of a person at the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub id: String,
    pub group_id: String,
    #[serde(default)]
    pub role: String,
}

/// Remote person/group/membership operations.
///
/// Implementations must be safe to call from several update workers at once.
pub trait DirectoryClient: Send + Sync {
    fn create_person(&self, person: &NewPerson) -> Result<(), RemoteError>;

    fn delete_person(&self, sync_key: &SyncKey) -> Result<(), RemoteError>;

    fn update_attribute(
        &self,
        sync_key: &SyncKey,
        attribute: PersonAttribute,
        value: &str,
    ) -> Result<(), RemoteError>;

    /// `Ok(None)` when the destination has no group with that name.
    fn read_group(&self, name: &str) -> Result<Option<Group>, RemoteError>;

    fn create_group(&self, group: &NewGroup) -> Result<(), RemoteError>;

    /// `group_id` is the sync id of a group or organization.
    fn create_membership(
        &self,
        group_id: &str,
        sync_key: &SyncKey,
        role: &str,
    ) -> Result<(), RemoteError>;

    fn delete_membership(&self, membership_id: &str) -> Result<(), RemoteError>;

    fn list_memberships(&self, sync_key: &SyncKey) -> Result<Vec<Membership>, RemoteError>;
}
