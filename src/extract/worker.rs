//! Extraction worker.
//!
//! Each worker:
//! - Opens its own view of the archive (no read cursor is shared)
//! - Claims entries from the work queue until it is empty or the run is cancelled
//! - Resolves the destination, applies the overwrite policy and writes the file
//! - Emits a "before" and an "after" progress event per entry

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::policy::{OverwritePolicy, Resolution};
use super::progress::{EntryEvent, EntryOutcome, ProgressSink};
use super::queue::WorkQueue;
use super::reconcile::apply_times;
use super::{ArchiveEntry, ArchiveSource, ExtractSummary};
use crate::error::{ExtractError, Result};

/// Outcome counters shared by all workers of a run
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    files_extracted: AtomicU64,
    files_replaced: AtomicU64,
    files_skipped: AtomicU64,
    directories: AtomicU64,
    bytes_written: AtomicU64,
}

impl RunStats {
    fn record(&self, outcome: EntryOutcome) {
        match outcome {
            EntryOutcome::Extracted { bytes, replaced } => {
                self.files_extracted.fetch_add(1, Ordering::Relaxed);
                self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
                if replaced {
                    self.files_replaced.fetch_add(1, Ordering::Relaxed);
                }
            }
            EntryOutcome::Skipped => {
                self.files_skipped.fetch_add(1, Ordering::Relaxed);
            }
            EntryOutcome::Directory => {
                self.directories.fetch_add(1, Ordering::Relaxed);
            }
            EntryOutcome::Cancelled => {}
        }
    }
}

/// State of one extraction run, shared by every worker
pub(crate) struct RunState {
    pub target: PathBuf,
    pub policy: OverwritePolicy,
    pub allow_parent_paths: bool,
    pub sink: Arc<dyn ProgressSink>,
    /// Run-scoped; once cancelled no worker claims another entry
    pub cancel: CancellationToken,
    sequence: AtomicU64,
    stats: RunStats,
}

impl RunState {
    pub fn new(
        target: PathBuf,
        policy: OverwritePolicy,
        allow_parent_paths: bool,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            policy,
            allow_parent_paths,
            sink,
            cancel,
            sequence: AtomicU64::new(0),
            stats: RunStats::default(),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Stop the run after a fatal error
    pub fn halt(&self) {
        self.cancel.cancel();
    }

    pub fn summary(&self) -> ExtractSummary {
        ExtractSummary {
            files_extracted: self.stats.files_extracted.load(Ordering::Relaxed),
            files_replaced: self.stats.files_replaced.load(Ordering::Relaxed),
            files_skipped: self.stats.files_skipped.load(Ordering::Relaxed),
            directories: self.stats.directories.load(Ordering::Relaxed),
            bytes_written: self.stats.bytes_written.load(Ordering::Relaxed),
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

/// A worker's identity and its private archive view
pub(crate) struct WorkerContext<V> {
    pub id: usize,
    pub view: V,
}

impl<V> WorkerContext<V> {
    pub async fn open<A>(id: usize, source: &A) -> Result<Self>
    where
        A: ArchiveSource<View = V>,
    {
        let view = source.open_view().await?;
        Ok(Self { id, view })
    }
}

/// Join `name` onto `target`.
///
/// Leading separators are stripped. Unless `allow_parent_paths` is set,
/// names with `..`, root or drive-prefix components are rejected.
pub fn destination_path(target: &Path, name: &str, allow_parent_paths: bool) -> Result<PathBuf> {
    let relative = Path::new(name.trim_start_matches(['/', '\\']));

    if !allow_parent_paths
        && relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(ExtractError::UnsafePath {
            name: name.to_string(),
        });
    }

    Ok(target.join(relative))
}

/// Handle a single claimed entry from start to finish.
pub(crate) async fn process_entry<A: ArchiveSource>(
    run: &RunState,
    source: &A,
    view: &mut A::View,
    entry: &A::Entry,
) -> Result<EntryOutcome> {
    let destination = destination_path(&run.target, entry.name(), run.allow_parent_paths)?;
    let mut event = EntryEvent {
        sequence: run.next_sequence(),
        entry,
        target: &run.target,
        destination: &destination,
        outcome: None,
    };
    run.sink.entry_started(&event);

    let outcome = if entry.is_directory() {
        fs::create_dir_all(&destination)
            .await
            .map_err(|e| ExtractError::io(&destination, e))?;
        EntryOutcome::Directory
    } else {
        extract_file(run, source, view, entry, &destination).await?
    };

    run.stats.record(outcome);
    if outcome == EntryOutcome::Cancelled {
        warn!(name = entry.name(), "extraction cancelled by conflict handler");
        run.cancel.cancel();
    }

    event.outcome = Some(outcome);
    run.sink.entry_finished(&event);
    Ok(outcome)
}

async fn extract_file<A: ArchiveSource>(
    run: &RunState,
    source: &A,
    view: &mut A::View,
    entry: &A::Entry,
    destination: &Path,
) -> Result<EntryOutcome> {
    if let Some(parent) = destination.parent() {
        // create_dir_all tolerates a sibling worker creating the same parent
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ExtractError::io(parent, e))?;
    }

    let replaced = match fs::symlink_metadata(destination).await {
        Ok(meta) if meta.is_file() => {
            match run.policy.resolve(entry, &run.target, destination).await? {
                Resolution::Extract => true,
                Resolution::Skip => return Ok(EntryOutcome::Skipped),
                Resolution::CancelRun => return Ok(EntryOutcome::Cancelled),
            }
        }
        _ => false,
    };

    if replaced {
        fs::remove_file(destination)
            .await
            .map_err(|e| ExtractError::io(destination, e))?;
    }

    // create_new: a destination that appeared after the policy check is an
    // error, never a silent truncation.
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(destination)
        .await
        .map_err(|e| ExtractError::io(destination, e))?;
    file.set_len(entry.uncompressed_size())
        .await
        .map_err(|e| ExtractError::io(destination, e))?;

    let bytes = source.extract_entry(view, entry, &mut file).await?;
    // tokio defers the last write; its error surfaces only on flush
    file.flush()
        .await
        .map_err(|e| ExtractError::io(destination, e))?;

    let times = entry.times();
    if !times.is_empty() {
        let file = file.into_std().await;
        apply_times(&file, &times).map_err(|e| ExtractError::io(destination, e))?;
    }

    debug!(name = entry.name(), bytes, replaced, "entry extracted");
    Ok(EntryOutcome::Extracted { bytes, replaced })
}

/// Drain `queue` until it is empty or the run is cancelled.
///
/// A fatal error halts the whole run before it is returned, so sibling
/// workers stop claiming entries.
pub(crate) async fn run_worker<A: ArchiveSource>(
    id: usize,
    source: Arc<A>,
    queue: Arc<WorkQueue<usize>>,
    run: Arc<RunState>,
) -> Result<()> {
    let result = drain(id, source.as_ref(), &queue, &run).await;
    if let Err(ref e) = result {
        error!(worker = id, error = %e, "worker failed, halting run");
        run.halt();
    }
    result
}

async fn drain<A: ArchiveSource>(
    id: usize,
    source: &A,
    queue: &WorkQueue<usize>,
    run: &RunState,
) -> Result<()> {
    let mut ctx = WorkerContext::open(id, source).await?;
    let entries = source.entries();
    let mut handled = 0u64;

    debug!(worker = ctx.id, "worker started");

    while !run.cancel.is_cancelled() {
        let Some(&index) = queue.try_dequeue() else {
            break;
        };
        process_entry(run, source, &mut ctx.view, &entries[index]).await?;
        handled += 1;
    }

    debug!(
        worker = ctx.id,
        handled,
        abandoned = queue.remaining(),
        "worker finished"
    );
    Ok(())
}
