//! Progress notifications emitted during a run.

use std::path::Path;
use tracing::{debug, info};

use super::{ArchiveEntry, ExtractSummary};

/// How an entry was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// File written; `replaced` when an existing file was overwritten
    Extracted { bytes: u64, replaced: bool },
    /// Existing destination kept
    Skipped,
    /// Directory created
    Directory,
    /// Conflict handler stopped the run at this entry
    Cancelled,
}

/// One "before" or "after" notification for an entry.
///
/// `sequence` is assigned when the entry is claimed and is unique per
/// entry, not per event: an entry's "before" and "after" events carry the
/// same number, so it cannot be used to de-duplicate events. `outcome` is
/// `None` on the "before" event.
pub struct EntryEvent<'a> {
    pub sequence: u64,
    pub entry: &'a dyn ArchiveEntry,
    pub target: &'a Path,
    pub destination: &'a Path,
    pub outcome: Option<EntryOutcome>,
}

/// Receiver of run progress.
///
/// With more than one worker the entry callbacks arrive concurrently and in
/// no particular order.
pub trait ProgressSink: Send + Sync {
    fn run_started(&self, _target: &Path, _total_entries: usize) {}

    fn entry_started(&self, _event: &EntryEvent<'_>) {}

    fn entry_finished(&self, _event: &EntryEvent<'_>) {}

    fn run_completed(&self, _target: &Path, _summary: &ExtractSummary) {}
}

/// Discards all notifications.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn run_started(&self, target: &Path, total_entries: usize) {
        info!(dir = %target.display(), total_entries, "extracting archive");
    }

    fn entry_started(&self, event: &EntryEvent<'_>) {
        debug!(seq = event.sequence, name = event.entry.name(), "entry started");
    }

    fn entry_finished(&self, event: &EntryEvent<'_>) {
        debug!(
            seq = event.sequence,
            name = event.entry.name(),
            outcome = ?event.outcome,
            "entry finished"
        );
    }

    fn run_completed(&self, target: &Path, summary: &ExtractSummary) {
        info!(
            dir = %target.display(),
            files = summary.files_extracted,
            skipped = summary.files_skipped,
            bytes = summary.bytes_written,
            cancelled = summary.cancelled,
            "archive extracted"
        );
    }
}
