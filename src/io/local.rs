use super::ReadAt;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Local file reader with random access support
pub struct LocalFileReader {
    path: PathBuf,
    file: std::fs::File,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Cannot open {}", path.display()))?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Path this reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }

        #[cfg(windows)]
        {
            // seek_read moves the shared cursor; each worker holds its own
            // handle from `reopen`, so no other reader observes it.
            use std::os::windows::fs::FileExt;
            Ok(self.file.seek_read(buf, offset)?)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            Ok(file.read(buf)?)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    async fn reopen(&self) -> Result<Self> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("Cannot reopen {}", self.path.display()))?;
        Ok(Self {
            path: self.path.clone(),
            file,
            size: self.size,
        })
    }
}
