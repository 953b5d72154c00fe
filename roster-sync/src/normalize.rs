//! Name and profile normalization.
//!
//! Pure functions over a [`PersonRecord`] and the institution's
//! [`InstitutionSyncPolicy`]. Nothing here touches the store or the network.

use roster_core::types::{profile, InstitutionSyncPolicy, PersonRecord};
use roster_core::{NewPerson, SyncKey};

/// Placeholder for a missing first or last name.
pub const NO_NAME: &str = "NN";

/// Every derived attribute the destination receives for one person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPerson {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub profile: String,
    pub email: String,
    pub admin_override: bool,
}

impl NormalizedPerson {
    pub fn to_new_person(&self, sync_key: &SyncKey) -> NewPerson {
        NewPerson {
            sync_key: sync_key.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            username: self.username.clone(),
            profile: self.profile.clone(),
            email: self.email.clone(),
        }
    }
}

pub fn normalize(policy: &InstitutionSyncPolicy, record: &PersonRecord) -> NormalizedPerson {
    let admin_override = admin_override(policy, record);
    NormalizedPerson {
        first_name: first_name(policy, record),
        last_name: last_name(record),
        username: record.username.clone(),
        profile: profile(record, admin_override),
        email: email(policy, record),
        admin_override,
    }
}

/// Derive the first name sent downstream.
///
/// Shortening rules are keyed on the raw profile and applied in a fixed
/// order: teacher one-letter, student one-letter, teacher one-name, student
/// one-name. The teacher one-name rule also covers administrators.
/// Exempted sync keys keep their raw first name.
pub fn first_name(policy: &InstitutionSyncPolicy, record: &PersonRecord) -> String {
    let raw = record.first_name.as_str();
    if raw.is_empty() {
        return NO_NAME.to_string();
    }
    if policy.full_first_name_exceptions.contains(&record.sync_key) {
        return raw.to_string();
    }

    let rules = &policy.shortening;
    let role = record.profile.as_str();
    let mut name = raw.to_string();
    if rules.teacher_one_letter && role == profile::STAFF {
        name = one_letter(&name);
    }
    if rules.student_one_letter && role == profile::STUDENT {
        name = one_letter(&name);
    }
    if rules.teacher_one_name && (role == profile::STAFF || role == profile::ADMINISTRATOR) {
        name = one_name(&name);
    }
    if rules.student_one_name && role == profile::STUDENT {
        name = one_name(&name);
    }
    name
}

/// `"Anna Maria"` → `"A."`
fn one_letter(name: &str) -> String {
    name.split_whitespace()
        .next()
        .and_then(|token| token.chars().next())
        .map(|c| format!("{c}."))
        .unwrap_or_else(|| NO_NAME.to_string())
}

/// `"Anna Maria"` → `"Anna"`
fn one_name(name: &str) -> String {
    name.split_whitespace()
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| NO_NAME.to_string())
}

pub fn last_name(record: &PersonRecord) -> String {
    if record.last_name.is_empty() {
        NO_NAME.to_string()
    } else {
        record.last_name.clone()
    }
}

pub fn email(policy: &InstitutionSyncPolicy, record: &PersonRecord) -> String {
    if policy.email_sync_disabled {
        String::new()
    } else {
        record.email.clone()
    }
}

/// True iff the override is enabled and the raw surname is listed exactly.
pub fn admin_override(policy: &InstitutionSyncPolicy, record: &PersonRecord) -> bool {
    policy.admin_override_enabled
        && policy
            .admin_last_names
            .iter()
            .any(|name| *name == record.last_name)
}

pub fn profile(record: &PersonRecord, admin_override: bool) -> String {
    if admin_override {
        profile::ADMINISTRATOR.to_string()
    } else {
        record.profile.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
