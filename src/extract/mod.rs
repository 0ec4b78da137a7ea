//! Concurrent extraction engine.
//!
//! [`extract_all`] writes every entry of an [`ArchiveSource`] below a
//! target directory, either sequentially in archive order or with a pool
//! of workers draining a shared [`WorkQueue`](queue::WorkQueue).
//!
//! ## Run structure
//!
//! 1. The target root is created and the sink receives `run_started`.
//! 2. One worker: entries are processed directly, in archive order.
//!    Several workers: every entry index is enqueued once, then the
//!    workers, each with its own archive view, claim entries until the
//!    queue is empty or the run is cancelled.
//! 3. If the run was not cancelled, directory entries get their archive
//!    timestamps back (see [`reconcile`]).
//! 4. The sink receives `run_completed` with the [`ExtractSummary`].
//!
//! ## Cancellation and failure
//!
//! Cancellation is cooperative and checked only between entries, so an
//! entry in flight always finishes. It comes from a conflict handler
//! answering [`ConflictDecision::Cancel`] or from the caller's token; either
//! stops every worker. A fatal error in one worker cancels the run as well
//! and is returned once all workers have been joined. Nothing is rolled
//! back: a failed run may leave a partially extracted tree, including a
//! partially written file.

mod policy;
mod progress;
mod queue;
mod reconcile;
mod source;
mod worker;

pub use policy::{ConflictDecision, ConflictHandler, OverwritePolicy, Resolution};
pub use progress::{EntryEvent, EntryOutcome, NoProgress, ProgressSink, TracingProgress};
pub use queue::WorkQueue;
pub use source::{ArchiveEntry, ArchiveSource, EntryTimes};
pub use worker::destination_path;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractError, Result};
use worker::{RunState, WorkerContext};

/// Options for one extraction run
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// What to do when a destination file exists
    pub policy: OverwritePolicy,
    /// Number of workers; 1 extracts sequentially in archive order
    pub workers: usize,
    /// External cancellation; the run observes a child of this token
    pub cancel: Option<CancellationToken>,
    /// Accept entry names with `..` or root components
    pub allow_parent_paths: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            policy: OverwritePolicy::default(),
            workers: 1,
            cancel: None,
            allow_parent_paths: false,
        }
    }
}

impl ExtractOptions {
    pub fn with_policy(mut self, policy: OverwritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn allow_parent_paths(mut self, allow: bool) -> Self {
        self.allow_parent_paths = allow;
        self
    }
}

/// What a run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files_extracted: u64,
    /// Subset of `files_extracted` that replaced an existing file
    pub files_replaced: u64,
    pub files_skipped: u64,
    pub directories: u64,
    pub bytes_written: u64,
    /// The run stopped early; directory timestamps were not reconciled
    pub cancelled: bool,
}

/// Extract every entry of `source` below `target`.
///
/// Returns `Ok` with `cancelled` set when the run was cancelled, and `Err`
/// on the first fatal error (path conflict under
/// [`OverwritePolicy::Throw`], unsafe entry name, I/O or archive failure).
pub async fn extract_all<A: ArchiveSource>(
    source: Arc<A>,
    target: impl AsRef<Path>,
    options: &ExtractOptions,
    sink: Arc<dyn ProgressSink>,
) -> Result<ExtractSummary> {
    let target = target.as_ref().to_path_buf();
    let total = source.entries().len();
    let workers = options.workers.clamp(1, total.max(1));
    let cancel = options
        .cancel
        .as_ref()
        .map(CancellationToken::child_token)
        .unwrap_or_else(CancellationToken::new);

    tokio::fs::create_dir_all(&target)
        .await
        .map_err(|e| ExtractError::io(&target, e))?;

    let run = Arc::new(RunState::new(
        target,
        options.policy.clone(),
        options.allow_parent_paths,
        sink,
        cancel,
    ));

    info!(
        dir = %run.target.display(),
        entries = total,
        workers,
        policy = ?run.policy,
        "extraction started"
    );
    run.sink.run_started(&run.target, total);

    if workers == 1 {
        extract_sequential(source.as_ref(), &run).await?;
    } else {
        extract_parallel(Arc::clone(&source), Arc::clone(&run), workers).await?;
    }

    let summary = run.summary();
    if summary.cancelled {
        warn!(
            extracted = summary.files_extracted,
            "extraction cancelled, directory timestamps not restored"
        );
    } else {
        reconcile::reconcile_directory_times(
            &run.target,
            source.entries(),
            run.allow_parent_paths,
        )
        .await?;
    }

    info!(
        files = summary.files_extracted,
        replaced = summary.files_replaced,
        skipped = summary.files_skipped,
        directories = summary.directories,
        bytes = summary.bytes_written,
        cancelled = summary.cancelled,
        "extraction finished"
    );
    run.sink.run_completed(&run.target, &summary);
    Ok(summary)
}

/// Archive order on a single view; sequence numbers follow entry order.
async fn extract_sequential<A: ArchiveSource>(source: &A, run: &RunState) -> Result<()> {
    let mut ctx = WorkerContext::open(0, source).await?;

    for entry in source.entries() {
        if run.cancel.is_cancelled() {
            break;
        }
        worker::process_entry(run, source, &mut ctx.view, entry).await?;
    }

    Ok(())
}

async fn extract_parallel<A: ArchiveSource>(
    source: Arc<A>,
    run: Arc<RunState>,
    workers: usize,
) -> Result<()> {
    let mut queue = WorkQueue::with_capacity(source.entries().len());
    for index in 0..source.entries().len() {
        queue.enqueue(index);
    }
    debug!(queued = queue.remaining(), workers, "work queue populated");
    let queue = Arc::new(queue);

    let mut set = JoinSet::new();
    let mut worker_ids = HashMap::with_capacity(workers);
    for id in 0..workers {
        let handle = set.spawn(worker::run_worker(
            id,
            Arc::clone(&source),
            Arc::clone(&queue),
            Arc::clone(&run),
        ));
        worker_ids.insert(handle.id(), id);
    }

    let mut first_error = None;
    while let Some(joined) = set.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                let id = worker_ids.get(&e.id()).copied().unwrap_or_default();
                error!(worker = id, error = %e, "worker terminated abnormally");
                run.halt();
                Err(ExtractError::Worker {
                    id,
                    reason: e.to_string(),
                })
            }
        };
        if let Err(e) = result {
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}
