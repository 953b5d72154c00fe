//! # roster-lms
//!
//! Destination directory clients implementing
//! [`roster_core::DirectoryClient`]:
//!
//! - [`HttpDirectory`]: JSON over HTTP with Basic auth
//! - [`DryRunDirectory`]: records the calls a run would make

pub mod dry_run;
pub mod error;
pub mod http;

pub use dry_run::{DryRunCall, DryRunDirectory};
pub use error::DirectoryError;
pub use http::HttpDirectory;
