//! Overwrite policy: what to do when a destination file already exists.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::ArchiveEntry;
use crate::error::{ExtractError, Result};

/// Answer of a [`ConflictHandler`] for one existing destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Replace the existing file
    Proceed,
    /// Keep the existing file, continue with the next entry
    Skip,
    /// Stop the whole run
    Cancel,
}

/// Decision hook consulted under [`OverwritePolicy::InvokeCallback`].
///
/// May be called concurrently from several workers.
#[async_trait]
pub trait ConflictHandler: Send + Sync {
    async fn check_existing(
        &self,
        entry: &dyn ArchiveEntry,
        target_dir: &Path,
        full_path: &Path,
    ) -> ConflictDecision;
}

/// Run-wide rule for destinations that already exist as files.
#[derive(Clone, Default)]
pub enum OverwritePolicy {
    /// Abort the run with [`ExtractError::PathConflict`]
    #[default]
    Throw,
    /// Replace, logging a notification
    Overwrite,
    /// Replace without notification
    OverwriteSilently,
    /// Skip the entry
    DontOverwrite,
    /// Ask the handler
    InvokeCallback(Arc<dyn ConflictHandler>),
}

impl fmt::Debug for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Throw => f.write_str("Throw"),
            Self::Overwrite => f.write_str("Overwrite"),
            Self::OverwriteSilently => f.write_str("OverwriteSilently"),
            Self::DontOverwrite => f.write_str("DontOverwrite"),
            Self::InvokeCallback(_) => f.write_str("InvokeCallback(..)"),
        }
    }
}

/// Outcome of resolving a conflict, consumed by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Extract,
    Skip,
    CancelRun,
}

impl OverwritePolicy {
    /// Resolve a conflict for `entry`, whose destination `full_path`
    /// already exists as a file.
    pub async fn resolve(
        &self,
        entry: &dyn ArchiveEntry,
        target_dir: &Path,
        full_path: &Path,
    ) -> Result<Resolution> {
        match self {
            Self::Throw => Err(ExtractError::PathConflict {
                path: full_path.to_path_buf(),
            }),
            Self::Overwrite => {
                info!(path = %full_path.display(), "overwriting existing file");
                Ok(Resolution::Extract)
            }
            Self::OverwriteSilently => Ok(Resolution::Extract),
            Self::DontOverwrite => {
                debug!(path = %full_path.display(), "destination exists, skipping");
                Ok(Resolution::Skip)
            }
            Self::InvokeCallback(handler) => {
                let decision = handler.check_existing(entry, target_dir, full_path).await;
                debug!(path = %full_path.display(), ?decision, "conflict handler answered");
                Ok(match decision {
                    ConflictDecision::Proceed => Resolution::Extract,
                    ConflictDecision::Skip => Resolution::Skip,
                    ConflictDecision::Cancel => Resolution::CancelRun,
                })
            }
        }
    }
}
