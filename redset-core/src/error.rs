use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Run-level error taxonomy. Failures local to one set carry its index so
/// that just that step can be retried; shared-infrastructure failures
/// (configuration, staging state) abort the whole run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error(
        "insufficient scratch space in {}: {} MiB free, {} MiB needed",
        .dir.display(),
        .have / (1 << 20),
        .need / (1 << 20)
    )]
    InsufficientSpace { dir: PathBuf, have: u64, need: u64 },

    #[error(
        "staging directory {} already exists and is not empty; \
         stale residue from a prior run would corrupt set boundaries",
        .dir.display()
    )]
    StagingConflict { dir: PathBuf },

    #[error("{tool} failed{}: {detail}\n  command: {command}", set_suffix(.set_index))]
    ExternalTool { tool: String, command: String, set_index: Option<u64>, detail: String },

    #[error("encoder protocol violation: {detail}")]
    Protocol { detail: String },

    #[error("integrity check failed for {}: {detail}", .path.display())]
    Integrity { path: PathBuf, detail: String },

    #[error(
        "set {set_index} is unrecoverable: {missing} members missing or corrupt, \
         parity covers at most {parity}"
    )]
    Unrecoverable { set_index: u64, missing: usize, parity: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn set_suffix(set_index: &Option<u64>) -> String {
    match set_index {
        Some(i) => format!(" for set {i}"),
        None => String::new(),
    }
}

impl Error {
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config { reason: reason.into() }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Error::Protocol { detail: detail.into() }
    }

    /// Process exit code for the CLI: 0 success, 2 configuration (including
    /// scratch-space and staging problems), 3 external tool or encoder
    /// protocol, 4 integrity or unrecoverable set, 1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. }
            | Error::InsufficientSpace { .. }
            | Error::StagingConflict { .. } => 2,
            Error::ExternalTool { .. } | Error::Protocol { .. } => 3,
            Error::Integrity { .. } | Error::Unrecoverable { .. } => 4,
            Error::Io(_) => 1,
        }
    }
}
