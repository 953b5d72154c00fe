//! Batch runner: per-institution phase loop, bounded update workers,
//! status log sink, periodic mode.

mod error;
pub mod log_rotation;
pub mod log_sink;
pub mod paths;
mod runtime;
pub mod scheduler;

pub use error::RunnerError;
pub use log_sink::{FileLogSink, LogSink, TracingLogSink};
pub use runtime::{
    run_blocking, run_once, run_pass, run_periodic, start_blocking, Destinations,
    HttpDestinations, RunOptions, RunSummary,
};
pub use scheduler::{InstitutionSummary, PhaseSummary, Scheduler};
