//! Error types for the sweep engine.
//!
//! Only conditions that abort a run (or a single launch step) are modelled
//! here. Readiness timeouts, termination failures and report rows that do
//! not parse are expected outcomes and are logged or recorded in the trial
//! result instead of being raised.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures surfaced by the sweep engine.
#[derive(Debug, Error)]
pub enum SweepError {
    /// One or more required external utilities are not on the search path.
    #[error("required utilities missing from PATH: {}", .0.join(", "))]
    MissingUtilities(Vec<String>),

    /// The target endpoint could not be understood.
    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The requested CPU caps cannot be satisfied by the host.
    #[error(
        "CPU allocation of {subject} subject + {loadgen} load generator cores exceeds the {total} usable cores"
    )]
    InvalidAllocation {
        subject: usize,
        loadgen: usize,
        total: usize,
    },

    /// The subject server process could not be started.
    #[error("failed to launch subject process {program:?}: {source}")]
    SubjectLaunch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The load generator process could not be started.
    #[error("failed to launch load generator {program:?}: {source}")]
    LoadGeneratorLaunch {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Reading the load generator's combined output failed.
    #[error("failed to capture load generator output: {0}")]
    OutputCapture(#[source] io::Error),

    /// The HTTP client used for readiness probing could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("invalid report pattern: {0}")]
    ReportPattern(#[from] regex::Error),
}

pub type SweepResult<T> = std::result::Result<T, SweepError>;
