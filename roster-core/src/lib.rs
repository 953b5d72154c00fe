//! Roster core library: domain types, registry persistence, record store,
//! destination client interface.
//!
//! - [`types`]: newtypes, person records, institution policy, audit entries
//! - [`error`]: [`RegistryError`], [`StoreError`]
//! - [`registry`]: per-institution YAML load / save / add
//! - [`settings`]: global settings and the run marker
//! - [`store`]: [`RecordStore`] plus file and memory implementations
//! - [`client`]: [`DirectoryClient`] and its payload types

pub mod client;
pub mod error;
pub mod registry;
pub mod settings;
pub mod store;
pub mod types;

pub use client::{
    DirectoryClient, Group, Membership, NewGroup, NewPerson, PersonAttribute, RemoteError,
};
pub use error::{RegistryError, StoreError};
pub use settings::{RosterSettings, RunMarker};
pub use store::{
    FileRecordStore, InstitutionLock, MemoryRecordStore, PendingFilter, RecordStore, SortOrder,
};
pub use types::{
    AuditAction, AuditEntry, DestinationConfig, FirstNameShortening, Institution, InstitutionId,
    InstitutionSyncPolicy, Intent, OrganizationFilter, PersonRecord, SyncKey, UpdateFlags,
};
