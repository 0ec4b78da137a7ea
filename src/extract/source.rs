//! Collaborator seams: the archive being extracted and its entries.

use async_trait::async_trait;
use std::time::SystemTime;
use tokio::fs::File;

/// Timestamps an archive declares for one entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryTimes {
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
}

impl EntryTimes {
    pub fn is_empty(&self) -> bool {
        self.modified.is_none() && self.accessed.is_none() && self.created.is_none()
    }
}

/// Metadata of one archive entry, borrowed from its source.
pub trait ArchiveEntry: Send + Sync {
    /// Archive-relative path
    fn name(&self) -> &str;

    /// Directory flag recorded by the archive itself
    fn directory_flag(&self) -> bool {
        false
    }

    /// Explicit flag, or a name ending in a path separator
    fn is_directory(&self) -> bool {
        self.directory_flag() || self.name().ends_with(['/', '\\'])
    }

    fn uncompressed_size(&self) -> u64;

    fn compressed_size(&self) -> u64;

    fn times(&self) -> EntryTimes;

    fn comment(&self) -> Option<&str> {
        None
    }

    /// Password the archive associates with this entry.
    ///
    /// The engine never reads it; a source that decrypts consults its own
    /// entries inside [`ArchiveSource::extract_entry`].
    fn password(&self) -> Option<&str> {
        None
    }
}

/// An archive the engine can extract.
///
/// `open_view` must return a handle that shares no read cursor with any
/// other view; the engine opens one per worker and never shares it.
#[async_trait]
pub trait ArchiveSource: Send + Sync + 'static {
    type Entry: ArchiveEntry + 'static;
    type View: Send + 'static;

    /// Entries in archive order
    fn entries(&self) -> &[Self::Entry];

    /// Open an independent read view of the archive bytes
    async fn open_view(&self) -> anyhow::Result<Self::View>;

    /// Write the decompressed bytes of `entry` into `out` using `view`.
    ///
    /// Returns the number of bytes written.
    async fn extract_entry(
        &self,
        view: &mut Self::View,
        entry: &Self::Entry,
        out: &mut File,
    ) -> anyhow::Result<u64>;
}
