//! Directory timestamp reconciliation.
//!
//! Writing files into a directory bumps the directory's own timestamps, so
//! archive-declared directory times are applied in a second pass, after
//! every file entry has been written.

use std::fs::{File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::worker::destination_path;
use super::{ArchiveEntry, EntryTimes};
use crate::error::{ExtractError, Result};

/// Apply every present field of `times` to an open file or directory.
pub(crate) fn apply_times(file: &File, times: &EntryTimes) -> io::Result<()> {
    let mut file_times = FileTimes::new();
    if let Some(modified) = times.modified {
        file_times = file_times.set_modified(modified);
    }
    if let Some(accessed) = times.accessed {
        file_times = file_times.set_accessed(accessed);
    }
    #[cfg(windows)]
    if let Some(created) = times.created {
        use std::os::windows::fs::FileTimesExt;
        file_times = file_times.set_created(created);
    }
    #[cfg(target_os = "macos")]
    if let Some(created) = times.created {
        use std::os::macos::fs::FileTimesExt;
        file_times = file_times.set_created(created);
    }
    file.set_times(file_times)
}

/// Open a directory with enough access to change its timestamps.
fn open_directory(path: &Path) -> io::Result<File> {
    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;
        const FILE_WRITE_ATTRIBUTES: u32 = 0x0000_0100;
        const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;
        std::fs::OpenOptions::new()
            .access_mode(FILE_WRITE_ATTRIBUTES)
            .custom_flags(FILE_FLAG_BACKUP_SEMANTICS)
            .open(path)
    }

    #[cfg(not(windows))]
    {
        File::open(path)
    }
}

/// Restore the archive-declared timestamps of every directory entry.
///
/// Destinations are recomputed with the same join rule the workers use.
/// Returns the number of directories stamped.
pub(crate) async fn reconcile_directory_times<E: ArchiveEntry>(
    target: &Path,
    entries: &[E],
    allow_parent_paths: bool,
) -> Result<usize> {
    let mut pending: Vec<(PathBuf, EntryTimes)> = Vec::new();
    for entry in entries.iter().filter(|e| e.is_directory()) {
        let times = entry.times();
        if times.is_empty() {
            continue;
        }
        pending.push((
            destination_path(target, entry.name(), allow_parent_paths)?,
            times,
        ));
    }

    if pending.is_empty() {
        return Ok(0);
    }

    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        for (path, times) in &pending {
            open_directory(path)
                .and_then(|dir| apply_times(&dir, times))
                .map_err(|e| ExtractError::io(path, e))?;
            debug!(path = %path.display(), "directory timestamps restored");
        }
        Ok(pending.len())
    })
    .await
    .map_err(|e| ExtractError::io(target, io::Error::other(e)))?
}
