//! Error kinds shared across the analysis pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every fallible outcome the pipeline can produce, from CLI entry point down
/// to a single searcher pass. Worker pools cancel on the first of these and
/// surface it to the caller; the LSP layer logs and discards instead (it must
/// keep the session alive).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("git resolution failed: {0}")]
    GitResolution(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out")]
    TimedOut,

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl From<regex::Error> for Error {
    fn from(e: regex::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}

impl From<git2::Error> for Error {
    fn from(e: git2::Error) -> Self {
        Error::GitResolution(e.to_string())
    }
}

impl Error {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::TimedOut)
    }
}
