//! Error types for roster-sync.

use thiserror::Error;

use roster_core::error::StoreError;

/// Infrastructure failures that stop a single record from being settled.
///
/// Decode and remote failures are not errors at this level: they settle the
/// record and are reported through [`crate::engine::Outcome`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Writing the record or its audit entry failed.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}
