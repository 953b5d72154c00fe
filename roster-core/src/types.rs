//! Domain types for person reconciliation.
//!
//! All types are serializable/deserializable via serde; the registry stores
//! them as YAML and the record store as JSON.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Numeric identifier of an institution (school authority, organization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstitutionId(pub u32);

impl fmt::Display for InstitutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for InstitutionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Stable cross-system identifier of a person.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncKey(pub String);

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for SyncKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SyncKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl SyncKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Role tags as delivered by the directory. Profiles are kept as strings
/// because the directory may deliver tags this crate does not know about.
pub mod profile {
    pub const STUDENT: &str = "Student";
    pub const STAFF: &str = "Staff";
    pub const ADMINISTRATOR: &str = "Administrator";
}

/// Marker the directory export carries when the source object was deleted.
pub const TOMBSTONE_MARKER: &str = r#"object": null,"#;

// ---------------------------------------------------------------------------
// Person record
// ---------------------------------------------------------------------------

/// Intent flags set by the upstream collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Intent {
    #[serde(default)]
    pub to_import: bool,
    #[serde(default)]
    pub to_update: bool,
    #[serde(default)]
    pub to_delete: bool,
}

/// Per-field update flags.
///
/// `home_org` and `disable` are carried through storage but never acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UpdateFlags {
    #[serde(default)]
    pub first_name: bool,
    #[serde(default)]
    pub last_name: bool,
    #[serde(default)]
    pub username: bool,
    #[serde(default)]
    pub profile: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default)]
    pub org_memberships: bool,
    #[serde(default)]
    pub group_memberships: bool,
    #[serde(default)]
    pub home_org: bool,
    #[serde(default)]
    pub disable: bool,
}

impl UpdateFlags {
    /// Every supported field flagged; reserved flags stay false.
    pub fn all_supported() -> Self {
        Self {
            first_name: true,
            last_name: true,
            username: true,
            profile: true,
            email: true,
            org_memberships: true,
            group_memberships: true,
            home_org: false,
            disable: false,
        }
    }

    pub fn any(&self) -> bool {
        *self != Self::default()
    }

    pub fn memberships(&self) -> bool {
        self.org_memberships || self.group_memberships
    }
}

/// One directory snapshot row per person per institution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub sync_key: SyncKey,
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub disabled: bool,
    /// JSON object: organization name → role.
    #[serde(default)]
    pub organization_memberships: String,
    /// JSON object: group name → owning organization name.
    #[serde(default)]
    pub group_memberships: String,
    /// Full directory export for this person.
    #[serde(default)]
    pub raw_data: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub updates: UpdateFlags,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub error_message: String,
    pub updated_at: DateTime<Utc>,
}

impl PersonRecord {
    /// Minimal record with empty payloads and no flags.
    pub fn new(sync_key: impl Into<SyncKey>, username: impl Into<String>) -> Self {
        Self {
            sync_key: sync_key.into(),
            username: username.into(),
            first_name: String::new(),
            last_name: String::new(),
            email: String::new(),
            profile: String::new(),
            disabled: false,
            organization_memberships: String::new(),
            group_memberships: String::new(),
            raw_data: String::new(),
            intent: Intent::default(),
            updates: UpdateFlags::default(),
            success: false,
            error: false,
            error_message: String::new(),
            updated_at: Utc::now(),
        }
    }

    /// The directory export says the source object no longer exists.
    pub fn is_tombstone(&self) -> bool {
        self.raw_data.contains(TOMBSTONE_MARKER)
    }

    pub fn has_payload(&self) -> bool {
        !self.raw_data.is_empty()
    }

    /// Terminal state: exactly one outcome bit set and no field flags left.
    pub fn is_settled(&self) -> bool {
        self.success != self.error && !self.updates.any()
    }
}

// ---------------------------------------------------------------------------
// Institution policy
// ---------------------------------------------------------------------------

/// First-name shortening toggles, applied per profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirstNameShortening {
    #[serde(default)]
    pub teacher_one_letter: bool,
    #[serde(default)]
    pub student_one_letter: bool,
    #[serde(default)]
    pub teacher_one_name: bool,
    #[serde(default)]
    pub student_one_name: bool,
}

/// Restricts which organizations are ever propagated downstream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrganizationFilter {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed: BTreeSet<String>,
}

impl OrganizationFilter {
    /// An organization is eligible when no filter is configured or it is
    /// listed in the allowed set.
    pub fn permits(&self, organization: &str) -> bool {
        !self.enabled || self.allowed.contains(organization)
    }
}

/// Per-institution reconciliation policy. Immutable for the duration of a
/// batch and shared read-only across workers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InstitutionSyncPolicy {
    #[serde(default)]
    pub admin_override_enabled: bool,
    /// Surnames promoted to Administrator, matched exactly in list order.
    #[serde(default)]
    pub admin_last_names: Vec<String>,
    /// Sync keys exempt from first-name shortening.
    #[serde(default)]
    pub full_first_name_exceptions: BTreeSet<SyncKey>,
    #[serde(default)]
    pub shortening: FirstNameShortening,
    #[serde(default)]
    pub email_sync_disabled: bool,
    #[serde(default)]
    pub disabled_user_sync_enabled: bool,
    #[serde(default)]
    pub organization_filter: OrganizationFilter,
    /// Substring patterns a Staff member's group must match to be kept.
    #[serde(default)]
    pub teacher_group_patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Institution
// ---------------------------------------------------------------------------

/// Connection settings for an institution's destination LMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub endpoint: String,
    pub username: String,
    /// Name of the environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

/// An institution registered for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub id: InstitutionId,
    pub name: String,
    /// Disabled institutions are skipped by every run.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub policy: InstitutionSyncPolicy,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Flow that produced an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Import,
    Update,
    Delete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Import => write!(f, "import"),
            AuditAction::Update => write!(f, "update"),
            AuditAction::Delete => write!(f, "delete"),
        }
    }
}

/// Append-only processing audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub username: String,
    pub sync_key: SyncKey,
    pub action: AuditAction,
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
