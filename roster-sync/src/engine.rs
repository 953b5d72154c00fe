//! Reconciliation engine: per-record import, delete and update flows.
//!
//! ## Record lifecycle
//!
//! ```text
//! PendingImport ──┐
//! PendingUpdate ──┼──> Settled(Success | Error)
//! PendingDelete ──┘
//! ```
//!
//! Tombstoned imports and updates are rewritten to `PendingDelete`; deletes
//! without a tombstone are rewritten to `PendingUpdate`. Neither redirect
//! calls the destination or writes an audit entry.
//!
//! Decode and remote failures settle the record as an error. Only record
//! store failures surface as [`SyncError`].

use std::fmt;
use std::sync::Arc;

use chrono::Utc;

use roster_core::types::{
    AuditAction, AuditEntry, InstitutionId, InstitutionSyncPolicy, Intent, PersonRecord,
    UpdateFlags,
};
use roster_core::{DirectoryClient, NewGroup, PersonAttribute, RecordStore, RemoteError, SyncKey};

use crate::eligibility::{is_organization_eligible, is_person_to_import};
use crate::error::SyncError;
use crate::membership::{self, ResolvedMemberships};
use crate::normalize::{self, NormalizedPerson};

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a group loop does when a group's owning organization is filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnIneligibleOrganization {
    /// Stop processing the remaining groups. Not an error.
    Abort,
    /// Skip this group and continue with the next.
    Skip,
}

/// Result of one pass over one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Settled with `success`.
    Succeeded,
    /// Settled with `success`, nothing sent to the destination.
    NotEligible,
    /// Settled with `error`.
    Failed { message: String },
    /// Rewritten to another intent and saved for a later phase.
    Redirected { to: AuditAction },
    /// Update entry without a raw payload. Reported as a failure but the
    /// record is left untouched in the store.
    EmptyPayload,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. } | Outcome::EmptyPayload)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::NotEligible => write!(f, "not eligible, skipped"),
            Outcome::Failed { message } => write!(f, "failed: {message}"),
            Outcome::Redirected { to } => write!(f, "redirected to {to}"),
            Outcome::EmptyPayload => write!(f, "failed: no raw payload"),
        }
    }
}

/// One line of per-record reporting, as shipped to the operational log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordReport {
    pub institution: InstitutionId,
    pub sync_key: SyncKey,
    pub username: String,
    pub action: AuditAction,
    pub outcome: Outcome,
}

impl fmt::Display for RecordReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "institution {}: {} {} ({}) {}",
            self.institution, self.action, self.username, self.sync_key, self.outcome
        )
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Runs the per-record flows for one institution.
///
/// Cheap to clone; clones share the store and the destination client.
#[derive(Clone)]
pub struct Reconciler {
    institution: InstitutionId,
    store: Arc<dyn RecordStore>,
    client: Arc<dyn DirectoryClient>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("institution", &self.institution)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        institution: InstitutionId,
        store: Arc<dyn RecordStore>,
        client: Arc<dyn DirectoryClient>,
    ) -> Self {
        Self {
            institution,
            store,
            client,
        }
    }

    pub fn institution(&self) -> InstitutionId {
        self.institution
    }

    /// Import flow. The caller only hands over records with a raw payload.
    pub fn import(
        &self,
        record: PersonRecord,
        policy: &InstitutionSyncPolicy,
    ) -> Result<RecordReport, SyncError> {
        if record.is_tombstone() {
            return self.redirect_to_delete(record, AuditAction::Import);
        }

        let person = normalize::normalize(policy, &record);
        let resolved = match membership::resolve(policy, &record, person.admin_override) {
            Ok(resolved) => resolved,
            Err(err) => return self.settle(record, AuditAction::Import, Err(err.to_string())),
        };

        if !is_person_to_import(policy, &record, &resolved.organizations) {
            tracing::info!("{} is not eligible for import", record.username);
            return self.settle_not_eligible(record, AuditAction::Import);
        }

        tracing::info!(
            "importing {} into institution {}",
            record.username,
            self.institution
        );
        let result = self
            .client
            .create_person(&person.to_new_person(&record.sync_key))
            .and_then(|()| {
                self.propagate_memberships(
                    policy,
                    &record.sync_key,
                    &resolved,
                    person.admin_override,
                    OnIneligibleOrganization::Abort,
                )
            });
        self.settle(record, AuditAction::Import, result.map_err(|e| e.to_string()))
    }

    /// Delete flow. Without a tombstone the instruction is treated as stale.
    pub fn delete(&self, record: PersonRecord) -> Result<RecordReport, SyncError> {
        if !record.is_tombstone() {
            tracing::info!(
                "{} has no tombstone, rescheduling as update",
                record.username
            );
            return self.redirect_to_update(record, AuditAction::Delete);
        }

        tracing::info!(
            "deleting {} from institution {}",
            record.username,
            self.institution
        );
        let result = self
            .client
            .delete_person(&record.sync_key)
            .map_err(|e| e.to_string());
        self.settle(record, AuditAction::Delete, result)
    }

    /// Update flow. Safe to run for distinct records on several workers.
    pub fn update(
        &self,
        record: PersonRecord,
        policy: &InstitutionSyncPolicy,
    ) -> Result<RecordReport, SyncError> {
        let person = normalize::normalize(policy, &record);
        let resolved = match membership::resolve(policy, &record, person.admin_override) {
            Ok(resolved) => resolved,
            Err(err) => return self.settle(record, AuditAction::Update, Err(err.to_string())),
        };

        if !is_person_to_import(policy, &record, &resolved.organizations) {
            tracing::info!("{} is not eligible for update", record.username);
            return self.settle_not_eligible(record, AuditAction::Update);
        }

        if record.is_tombstone() {
            return self.redirect_to_delete(record, AuditAction::Update);
        }

        if !record.has_payload() {
            // Left as is: the record stays pending for the next run.
            tracing::warn!("{} has no raw payload, update skipped", record.username);
            return Ok(self.report(&record, AuditAction::Update, Outcome::EmptyPayload));
        }

        tracing::info!(
            "updating {} in institution {}",
            record.username,
            self.institution
        );
        let result = self.apply_updates(policy, &record, &person, &resolved);
        self.settle(record, AuditAction::Update, result.map_err(|e| e.to_string()))
    }

    // -----------------------------------------------------------------------
    // Destination calls
    // -----------------------------------------------------------------------

    fn apply_updates(
        &self,
        policy: &InstitutionSyncPolicy,
        record: &PersonRecord,
        person: &NormalizedPerson,
        resolved: &ResolvedMemberships,
    ) -> Result<(), RemoteError> {
        let key = &record.sync_key;
        let mut flags = record.updates;
        flags.first_name = true;

        if flags.first_name {
            self.client
                .update_attribute(key, PersonAttribute::FirstName, &person.first_name)?;
        }
        if flags.last_name {
            self.client
                .update_attribute(key, PersonAttribute::LastName, &person.last_name)?;
        }
        if flags.username {
            self.client
                .update_attribute(key, PersonAttribute::Username, &person.username)?;
        }
        if flags.profile {
            self.client.create_person(&person.to_new_person(key))?;
        }
        if flags.email {
            self.client
                .update_attribute(key, PersonAttribute::Email, &person.email)?;
        }
        // home_org and disable are reserved and never acted on.

        if flags.memberships() {
            for existing in self.client.list_memberships(key)? {
                self.client.delete_membership(&existing.id)?;
            }
            self.propagate_memberships(
                policy,
                key,
                resolved,
                person.admin_override,
                OnIneligibleOrganization::Skip,
            )?;
        }
        Ok(())
    }

    /// Create organization memberships, then group memberships.
    ///
    /// Ineligible organizations are always skipped. Administrators never
    /// receive group memberships. A group membership carries the role the
    /// person holds in the owning organization.
    fn propagate_memberships(
        &self,
        policy: &InstitutionSyncPolicy,
        sync_key: &SyncKey,
        resolved: &ResolvedMemberships,
        admin_override: bool,
        on_ineligible: OnIneligibleOrganization,
    ) -> Result<(), RemoteError> {
        let client = self.client.as_ref();

        for (organization, role) in &resolved.organizations {
            if !is_organization_eligible(policy, organization) {
                tracing::debug!("organization {organization} is filtered out");
                continue;
            }
            ensure_group(client, &NewGroup::organization(organization))?;
            client.create_membership(organization, sync_key, role)?;
        }

        if admin_override {
            return Ok(());
        }

        for (group, organization) in &resolved.groups {
            if !is_organization_eligible(policy, organization) {
                tracing::debug!("group {group}: organization {organization} is filtered out");
                match on_ineligible {
                    OnIneligibleOrganization::Abort => break,
                    OnIneligibleOrganization::Skip => continue,
                }
            }
            ensure_group(client, &NewGroup::under_organization(group, organization))?;
            client.create_membership(group, sync_key, resolved.role_in(organization))?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Write-back
    // -----------------------------------------------------------------------

    fn settle(
        &self,
        record: PersonRecord,
        action: AuditAction,
        result: Result<(), String>,
    ) -> Result<RecordReport, SyncError> {
        match result {
            Ok(()) => self.write_settled(record, action, true, String::new(), Outcome::Succeeded),
            Err(message) => {
                tracing::warn!("{action} of {} failed: {message}", record.username);
                let outcome = Outcome::Failed {
                    message: message.clone(),
                };
                self.write_settled(record, action, false, message, outcome)
            }
        }
    }

    fn settle_not_eligible(
        &self,
        record: PersonRecord,
        action: AuditAction,
    ) -> Result<RecordReport, SyncError> {
        self.write_settled(record, action, true, String::new(), Outcome::NotEligible)
    }

    fn write_settled(
        &self,
        mut record: PersonRecord,
        action: AuditAction,
        success: bool,
        message: String,
        outcome: Outcome,
    ) -> Result<RecordReport, SyncError> {
        self.store.append_audit(&AuditEntry {
            username: record.username.clone(),
            sync_key: record.sync_key.clone(),
            action,
            success,
            error_message: message.clone(),
            timestamp: Utc::now(),
        })?;
        mark_settled(&mut record, action, success, message);
        self.store.save_person(&record)?;
        Ok(self.report(&record, action, outcome))
    }

    fn redirect_to_delete(
        &self,
        mut record: PersonRecord,
        from: AuditAction,
    ) -> Result<RecordReport, SyncError> {
        tracing::info!("{} is tombstoned, rescheduling as delete", record.username);
        record.intent = Intent {
            to_delete: true,
            ..Intent::default()
        };
        record.updates = UpdateFlags::default();
        clear_outcome(&mut record);
        self.store.save_person(&record)?;
        Ok(self.report(
            &record,
            from,
            Outcome::Redirected {
                to: AuditAction::Delete,
            },
        ))
    }

    fn redirect_to_update(
        &self,
        mut record: PersonRecord,
        from: AuditAction,
    ) -> Result<RecordReport, SyncError> {
        record.intent = Intent {
            to_update: true,
            ..Intent::default()
        };
        record.updates = UpdateFlags::all_supported();
        clear_outcome(&mut record);
        self.store.save_person(&record)?;
        Ok(self.report(
            &record,
            from,
            Outcome::Redirected {
                to: AuditAction::Update,
            },
        ))
    }

    fn report(&self, record: &PersonRecord, action: AuditAction, outcome: Outcome) -> RecordReport {
        RecordReport {
            institution: self.institution,
            sync_key: record.sync_key.clone(),
            username: record.username.clone(),
            action,
            outcome,
        }
    }
}

/// Create the group unless the destination already reports it present.
pub fn ensure_group(client: &dyn DirectoryClient, group: &NewGroup) -> Result<(), RemoteError> {
    if client.read_group(&group.name)?.is_none() {
        client.create_group(group)?;
    }
    Ok(())
}

/// Terminal flags for a settled record.
///
/// Failed imports and updates keep their intent so a later pass can retry
/// them; a delete keeps `to_delete` either way, meaning "confirmed deleted"
/// on success.
fn mark_settled(record: &mut PersonRecord, action: AuditAction, success: bool, message: String) {
    record.intent = Intent {
        to_import: action == AuditAction::Import && !success,
        to_update: action == AuditAction::Update && !success,
        to_delete: action == AuditAction::Delete,
    };
    record.updates = UpdateFlags::default();
    record.success = success;
    record.error = !success;
    record.error_message = message;
}

fn clear_outcome(record: &mut PersonRecord) {
    record.success = false;
    record.error = false;
    record.error_message.clear();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
