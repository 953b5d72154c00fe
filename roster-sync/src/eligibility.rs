//! Eligibility predicates.

use std::collections::BTreeMap;

use roster_core::types::{InstitutionSyncPolicy, PersonRecord};

/// Whether a person is in scope for propagation at all.
///
/// Disabled users are out of scope when the institution removes them
/// downstream; this check runs before any organization filtering. With an
/// organization filter configured, at least one membership must be in an
/// allowed organization.
pub fn is_person_to_import(
    policy: &InstitutionSyncPolicy,
    record: &PersonRecord,
    organizations: &BTreeMap<String, String>,
) -> bool {
    if policy.disabled_user_sync_enabled && record.disabled {
        return false;
    }
    if !policy.organization_filter.enabled {
        return true;
    }
    organizations
        .keys()
        .any(|organization| policy.organization_filter.permits(organization))
}

/// Whether memberships in `organization` are propagated.
pub fn is_organization_eligible(policy: &InstitutionSyncPolicy, organization: &str) -> bool {
    policy.organization_filter.permits(organization)
}
