//! # roster-sync
//!
//! Person reconciliation: normalization, membership resolution, eligibility
//! and the per-record import / delete / update flows.
//!
//! Build a [`Reconciler`] per institution from a record store and a
//! destination client, then feed it pending records. Everything here is
//! synchronous; `roster-runner` drives it from worker threads.

pub mod eligibility;
pub mod engine;
pub mod error;
pub mod key_lock;
pub mod membership;
pub mod normalize;

pub use engine::{ensure_group, OnIneligibleOrganization, Outcome, Reconciler, RecordReport};
pub use error::SyncError;
pub use key_lock::{KeyGuard, KeyLockRegistry};
pub use membership::{MembershipError, ResolvedMemberships};
pub use normalize::{normalize, NormalizedPerson};
