//! # punzip
//!
//! Concurrent ZIP extraction from local files and HTTP URLs.
//!
//! The [`extract`] engine writes every entry of an archive below a target
//! directory, sequentially or with a pool of workers that each read through
//! their own view of the archive. Existing files are handled by an
//! [`OverwritePolicy`], progress is reported through a [`ProgressSink`], and
//! directory timestamps are restored once all files are written.
//!
//! Remote archives are read with HTTP Range requests, so only the central
//! directory and the selected entries are downloaded.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use punzip::{ExtractOptions, LocalFileReader, OverwritePolicy, TracingProgress, ZipArchive};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new("archive.zip")?);
//!     let archive = Arc::new(ZipArchive::open(reader).await?);
//!
//!     let options = ExtractOptions::default()
//!         .with_policy(OverwritePolicy::DontOverwrite)
//!         .with_workers(4);
//!     let summary =
//!         punzip::extract_all(archive, "out", &options, Arc::new(TracingProgress)).await?;
//!     println!("{} files written", summary.files_extracted);
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod console;
pub mod error;
pub mod extract;
pub mod filter;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::ExtractError;
pub use extract::{
    ConflictDecision, ConflictHandler, ExtractOptions, ExtractSummary, OverwritePolicy,
    ProgressSink, TracingProgress, extract_all,
};
pub use io::{HttpRangeReader, LocalFileReader, ReadAt};
pub use zip::{ZipArchive, ZipExtractor, ZipFileEntry};
