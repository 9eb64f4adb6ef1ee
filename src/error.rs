//! Error taxonomy shared by every component of the bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::registry::store::RegistryError;

pub type Result<T> = std::result::Result<T, CagError>;

#[derive(Error, Debug)]
pub enum CagError {
    /// Bad or missing required request input.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Input file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Invalid context size: {0}")]
    InvalidSize(String),

    /// The external binary could not be launched at all.
    #[error("Failed to launch {}: {source}", program.display())]
    Invocation {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} did not finish within {}s and was killed", program.display(), timeout.as_secs())]
    Timeout { program: PathBuf, timeout: Duration },

    /// The external tool exited 0 but produced no artifact.
    #[error("Command reported success but {} was not created", .0.display())]
    Postcondition(PathBuf),

    #[error("Registry unavailable: {0}")]
    RegistryUnavailable(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used for logging and HTTP status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    MissingInput,
    InvalidSize,
    Invocation,
    Timeout,
    Postcondition,
    RegistryUnavailable,
    Io,
}

impl CagError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CagError::Validation(_) => ErrorKind::Validation,
            CagError::MissingInput(_) => ErrorKind::MissingInput,
            CagError::InvalidSize(_) => ErrorKind::InvalidSize,
            CagError::Invocation { .. } => ErrorKind::Invocation,
            CagError::Timeout { .. } => ErrorKind::Timeout,
            CagError::Postcondition(_) => ErrorKind::Postcondition,
            CagError::RegistryUnavailable(_) => ErrorKind::RegistryUnavailable,
            CagError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the caller supplied bad input (as opposed to an execution fault).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::MissingInput | ErrorKind::InvalidSize
        )
    }
}
