use std::path::PathBuf;

use roster_core::InstitutionId;
use thiserror::Error;

/// Error surface for the batch runner.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry error: {0}")]
    Registry(#[from] roster_core::RegistryError),

    #[error("record store error: {0}")]
    Store(#[from] roster_core::StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] roster_sync::SyncError),

    #[error("destination error: {0}")]
    Destination(#[from] roster_lms::DirectoryError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("institution {0} is disabled")]
    InstitutionDisabled(InstitutionId),

    #[error("task error: {0}")]
    Task(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RunnerError {
    RunnerError::Io {
        path: path.into(),
        source,
    }
}
