//! Main entry point for the punzip CLI application.
//!
//! Lists, pipes or extracts ZIP archives from the local filesystem or
//! remote HTTP URLs. Extraction runs on a pool of workers sized by
//! `--threads`; Ctrl-C stops the run after the entries in flight.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use punzip::console::ConsoleProgress;
use punzip::filter::EntryFilter;
use punzip::{
    Cli, ExtractOptions, HttpRangeReader, LocalFileReader, ReadAt, ZipArchive, ZipFileEntry,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.threads.max(1))
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    if cli.is_http_url() {
        // Remote archive via HTTP Range requests
        let reader = HttpRangeReader::new(cli.file.clone()).await?;
        let transferred_before = reader.transferred_bytes();
        let reader = Arc::new(reader);

        process_zip(reader.clone(), &cli).await?;

        // Counter is shared with every worker's reopened reader
        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(&cli.file)?);
        process_zip(reader, &cli).await?;
    }

    Ok(())
}

/// Dispatch to list, pipe or extract mode.
async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let mut archive = ZipArchive::open(reader).await?;

    if cli.list || cli.verbose {
        list_files(archive.entries(), cli.verbose);
        return Ok(());
    }

    let filter = EntryFilter::new(&cli.files, &cli.exclude)?;
    archive.retain(|e| filter.matches(&e.file_name, e.is_directory));
    if cli.junk_paths {
        archive.junk_paths();
    }
    debug!(selected = archive.entries().len(), "entries selected");

    if cli.pipe {
        return pipe_files(&archive).await;
    }

    extract_files(archive, cli).await
}

/// Print the selected files to stdout, in archive order.
async fn pipe_files<R: ReadAt + 'static>(archive: &ZipArchive<R>) -> Result<()> {
    let extractor = archive.extractor();
    let files: Vec<&ZipFileEntry> = archive
        .entries()
        .iter()
        .filter(|e| !e.is_directory)
        .collect();
    let show_filename = files.len() > 1;

    let mut stdout = tokio::io::stdout();
    for entry in files {
        if show_filename {
            stdout
                .write_all(format!("--- {} ---\n", entry.file_name).as_bytes())
                .await?;
            stdout.flush().await?;
        }
        extractor.extract_to_stdout(entry).await?;
    }

    Ok(())
}

async fn extract_files<R: ReadAt + 'static>(archive: ZipArchive<R>, cli: &Cli) -> Result<()> {
    let target = cli
        .extract_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing entries in flight");
            on_interrupt.cancel();
        }
    });

    let options = ExtractOptions::default()
        .with_policy(cli.overwrite_policy())
        .with_workers(cli.threads)
        .with_cancellation(cancel)
        .allow_parent_paths(cli.allow_parent_paths);
    let sink = Arc::new(ConsoleProgress::new(cli.is_quiet()));

    let summary = punzip::extract_all(Arc::new(archive), &target, &options, sink)
        .await
        .with_context(|| format!("Extraction into {} failed", target.display()))?;

    if summary.cancelled {
        bail!(
            "Extraction cancelled after {} file(s)",
            summary.files_extracted
        );
    }

    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
fn list_files(entries: &[ZipFileEntry], verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !verbose {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        let flag = if entry.is_encrypted() { "*" } else { "" };

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}{}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name,
            flag
        );
        if let Some(comment) = &entry.comment {
            println!("{:>46}{}", "", comment);
        }

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }
}

/// Percentage saved by compression, as a 5-wide column
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
