use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;

use crate::extract::{ArchiveEntry, ArchiveSource, EntryTimes};
use crate::io::ReadAt;
use anyhow::Result;

use super::extractor::ZipExtractor;
use super::parser::ZipParser;
use super::structures::ZipFileEntry;

impl ArchiveEntry for ZipFileEntry {
    fn name(&self) -> &str {
        &self.file_name
    }

    fn directory_flag(&self) -> bool {
        self.is_directory
    }

    fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    fn times(&self) -> EntryTimes {
        ZipFileEntry::times(self)
    }

    fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// A ZIP archive ready for extraction.
///
/// Holds the central directory listing and the reader it came from. Every
/// extraction worker gets its own view through [`ReadAt::reopen`].
pub struct ZipArchive<R: ReadAt> {
    reader: Arc<R>,
    entries: Vec<ZipFileEntry>,
}

impl<R: ReadAt> ZipArchive<R> {
    /// Read the central directory of the archive behind `reader`
    pub async fn open(reader: Arc<R>) -> Result<Self> {
        let entries = ZipParser::new(Arc::clone(&reader)).list_files().await?;
        Ok(Self { reader, entries })
    }

    /// Entries in central directory order
    pub fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    /// Keep only the entries matching `keep`
    pub fn retain(&mut self, keep: impl FnMut(&ZipFileEntry) -> bool) {
        self.entries.retain(keep);
    }

    /// Drop directory entries and strip every remaining name to its last
    /// component, so all files land directly in the target directory.
    pub fn junk_paths(&mut self) {
        self.entries.retain(|e| !e.is_directory);
        for entry in &mut self.entries {
            if let Some(base) = Path::new(&entry.file_name).file_name() {
                entry.file_name = base.to_string_lossy().to_string();
            }
        }
    }

    /// Extractor sharing this archive's reader
    pub fn extractor(&self) -> ZipExtractor<R> {
        ZipExtractor::new(Arc::clone(&self.reader))
    }
}

#[async_trait]
impl<R: ReadAt + 'static> ArchiveSource for ZipArchive<R> {
    type Entry = ZipFileEntry;
    type View = ZipExtractor<R>;

    fn entries(&self) -> &[ZipFileEntry] {
        &self.entries
    }

    async fn open_view(&self) -> Result<ZipExtractor<R>> {
        let reader = self.reader.reopen().await?;
        Ok(ZipExtractor::new(Arc::new(reader)))
    }

    async fn extract_entry(
        &self,
        view: &mut ZipExtractor<R>,
        entry: &ZipFileEntry,
        out: &mut File,
    ) -> Result<u64> {
        view.extract_to_writer(entry, out).await
    }
}
