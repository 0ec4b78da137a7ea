//! Terminal front end for an extraction run: per-entry progress lines and
//! the interactive overwrite prompt.

use async_trait::async_trait;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

use crate::extract::{
    ArchiveEntry, ConflictDecision, ConflictHandler, EntryEvent, EntryOutcome, ExtractSummary,
    ProgressSink,
};

/// Prints one line per handled entry, unzip style.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleProgress {
    quiet: bool,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ProgressSink for ConsoleProgress {
    fn run_started(&self, target: &Path, total_entries: usize) {
        if !self.quiet {
            println!("Extracting {} entries to {}", total_entries, target.display());
        }
    }

    fn entry_finished(&self, event: &EntryEvent<'_>) {
        if self.quiet {
            return;
        }
        let name = event.entry.name();
        match event.outcome {
            Some(EntryOutcome::Extracted { .. }) => println!("  extracting: {}", name),
            Some(EntryOutcome::Directory) => println!("   creating: {}", name),
            Some(EntryOutcome::Skipped) => eprintln!("Skipping: {} (file exists)", name),
            Some(EntryOutcome::Cancelled) | None => {}
        }
    }

    fn run_completed(&self, _target: &Path, summary: &ExtractSummary) {
        if self.quiet {
            return;
        }
        if summary.files_skipped > 0 {
            eprintln!("{} file(s) skipped", summary.files_skipped);
        }
        if summary.cancelled {
            eprintln!("Extraction cancelled");
        }
    }
}

struct PromptState<R> {
    input: R,
    /// Sticky answer from `A` or `N`
    remembered: Option<ConflictDecision>,
}

/// Asks on the terminal before replacing an existing file.
///
/// Concurrent workers queue on the mutex, so only one question is on
/// screen at a time. End of input counts as "no".
pub struct PromptConflictHandler<R> {
    state: Mutex<PromptState<R>>,
}

impl PromptConflictHandler<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> PromptConflictHandler<R> {
    pub fn new(input: R) -> Self {
        Self {
            state: Mutex::new(PromptState {
                input,
                remembered: None,
            }),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ConflictHandler for PromptConflictHandler<R> {
    async fn check_existing(
        &self,
        _entry: &dyn ArchiveEntry,
        _target_dir: &Path,
        full_path: &Path,
    ) -> ConflictDecision {
        let mut state = self.state.lock().await;
        if let Some(decision) = state.remembered {
            return decision;
        }

        loop {
            eprint!(
                "replace {}? [y]es, [n]o, [A]ll, [N]one, [q]uit: ",
                full_path.display()
            );
            let mut line = String::new();
            match state.input.read_line(&mut line).await {
                Ok(0) | Err(_) => {
                    eprintln!();
                    state.remembered = Some(ConflictDecision::Skip);
                    return ConflictDecision::Skip;
                }
                Ok(_) => {}
            }

            match line.trim() {
                "y" | "Y" => return ConflictDecision::Proceed,
                "n" => return ConflictDecision::Skip,
                "A" => {
                    state.remembered = Some(ConflictDecision::Proceed);
                    return ConflictDecision::Proceed;
                }
                "N" => {
                    state.remembered = Some(ConflictDecision::Skip);
                    return ConflictDecision::Skip;
                }
                "q" | "Q" => return ConflictDecision::Cancel,
                other => eprintln!("error:  invalid response [{}]", other),
            }
        }
    }
}
