//! Membership resolver.
//!
//! Decodes the raw membership payloads of a record into ordered maps:
//!
//! - organizations: organization name → role
//! - groups: group name → owning organization name
//!
//! Decode failures are fatal for the record and are returned, never ignored.

use std::collections::BTreeMap;

use thiserror::Error;

use roster_core::types::{profile, InstitutionSyncPolicy, PersonRecord};

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("malformed organization memberships: {0}")]
    Organizations(#[source] serde_json::Error),

    #[error("malformed group memberships: {0}")]
    Groups(#[source] serde_json::Error),
}

/// Decoded memberships of one person.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMemberships {
    pub organizations: BTreeMap<String, String>,
    pub groups: BTreeMap<String, String>,
}

impl ResolvedMemberships {
    /// Role the person holds in `organization`, empty if none.
    pub fn role_in(&self, organization: &str) -> &str {
        self.organizations
            .get(organization)
            .map(String::as_str)
            .unwrap_or("")
    }
}

pub fn resolve(
    policy: &InstitutionSyncPolicy,
    record: &PersonRecord,
    admin_override: bool,
) -> Result<ResolvedMemberships, MembershipError> {
    Ok(ResolvedMemberships {
        organizations: organization_memberships(record, admin_override)?,
        groups: group_memberships(policy, record)?,
    })
}

/// Organization → role. With the admin override every role becomes
/// `Administrator`.
pub fn organization_memberships(
    record: &PersonRecord,
    admin_override: bool,
) -> Result<BTreeMap<String, String>, MembershipError> {
    let mut organizations =
        decode(&record.organization_memberships).map_err(MembershipError::Organizations)?;
    if admin_override {
        for role in organizations.values_mut() {
            *role = profile::ADMINISTRATOR.to_string();
        }
    }
    Ok(organizations)
}

/// Group → owning organization.
///
/// Staff members only keep groups whose name contains one of the
/// institution's teacher group patterns. No patterns means no filtering.
pub fn group_memberships(
    policy: &InstitutionSyncPolicy,
    record: &PersonRecord,
) -> Result<BTreeMap<String, String>, MembershipError> {
    let groups = decode(&record.group_memberships).map_err(MembershipError::Groups)?;
    if record.profile != profile::STAFF || policy.teacher_group_patterns.is_empty() {
        return Ok(groups);
    }
    Ok(groups
        .into_iter()
        .filter(|(group, _)| {
            policy
                .teacher_group_patterns
                .iter()
                .any(|pattern| group.contains(pattern.as_str()))
        })
        .collect())
}

/// A JSON `null` decodes to an empty map; an empty string is malformed.
fn decode(payload: &str) -> Result<BTreeMap<String, String>, serde_json::Error> {
    let map: Option<BTreeMap<String, String>> = serde_json::from_str(payload)?;
    Ok(map.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn staff(groups: &str) -> PersonRecord {
        let mut r = PersonRecord::new("k1", "teacher");
        r.profile = profile::STAFF.to_string();
        r.organization_memberships = r#"{"SchoolA": "Staff"}"#.to_string();
        r.group_memberships = groups.to_string();
        r
    }

    #[test]
    fn admin_override_rewrites_every_role() {
        let mut r = PersonRecord::new("k1", "admin");
        r.organization_memberships = r#"{"SchoolA": "Staff", "SchoolB": "Student"}"#.to_string();
        let orgs = organization_memberships(&r, true).unwrap();
        assert!(orgs.values().all(|role| role == "Administrator"));
        let orgs = organization_memberships(&r, false).unwrap();
        assert_eq!(orgs["SchoolB"], "Student");
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut r = PersonRecord::new("k1", "jdoe");
        r.organization_memberships = "{broken".to_string();
        r.group_memberships = "{}".to_string();
        let err = resolve(&InstitutionSyncPolicy::default(), &r, false).unwrap_err();
        assert!(matches!(err, MembershipError::Organizations(_)));
        assert!(err.to_string().contains("organization memberships"));
    }

    #[test]
    fn empty_payload_is_malformed_but_null_is_empty() {
        let mut r = PersonRecord::new("k1", "jdoe");
        r.organization_memberships = "null".to_string();
        r.group_memberships = String::new();
        assert!(organization_memberships(&r, false).unwrap().is_empty());
        assert!(matches!(
            group_memberships(&InstitutionSyncPolicy::default(), &r),
            Err(MembershipError::Groups(_))
        ));
    }

    #[test]
    fn staff_groups_filtered_by_teacher_patterns() {
        let policy = InstitutionSyncPolicy {
            teacher_group_patterns: vec!["lehrer".to_string()],
            ..Default::default()
        };
        let r = staff(r#"{"lehrer-SchoolA": "SchoolA", "5a": "SchoolA"}"#);
        let groups = group_memberships(&policy, &r).unwrap();
        assert_eq!(groups.keys().collect::<Vec<_>>(), vec!["lehrer-SchoolA"]);
    }

    #[test]
    fn no_patterns_keeps_all_staff_groups() {
        let r = staff(r#"{"lehrer-SchoolA": "SchoolA", "5a": "SchoolA"}"#);
        let groups = group_memberships(&InstitutionSyncPolicy::default(), &r).unwrap();
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn students_are_never_pattern_filtered() {
        let policy = InstitutionSyncPolicy {
            teacher_group_patterns: vec!["lehrer".to_string()],
            ..Default::default()
        };
        let mut r = staff(r#"{"5a": "SchoolA"}"#);
        r.profile = profile::STUDENT.to_string();
        assert_eq!(group_memberships(&policy, &r).unwrap().len(), 1);
    }

    #[test]
    fn role_in_defaults_to_empty() {
        let resolved = ResolvedMemberships {
            organizations: [("SchoolA".to_string(), "Student".to_string())].into(),
            groups: BTreeMap::new(),
        };
        assert_eq!(resolved.role_in("SchoolA"), "Student");
        assert_eq!(resolved.role_in("SchoolB"), "");
    }
}
