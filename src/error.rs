//! Error types for the extraction engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort an extraction run.
///
/// Cancellation is not an error: a cancelled run returns a summary with
/// `cancelled` set.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Destination exists and the overwrite policy is `Throw`.
    #[error("destination already exists: {}", path.display())]
    PathConflict { path: PathBuf },

    /// Entry name would resolve outside the target directory.
    #[error("entry name escapes the target directory: {name}")]
    UnsafePath { name: String },

    /// Filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Archive reader or codec failure.
    #[error(transparent)]
    Archive(#[from] anyhow::Error),

    /// A worker task panicked or was aborted.
    #[error("worker {id} terminated abnormally: {reason}")]
    Worker { id: usize, reason: String },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractError>;
