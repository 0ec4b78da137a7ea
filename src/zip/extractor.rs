use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};
use flate2::{Crc, Decompress, FlushDecompress, Status};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// Read size for pulling compressed bytes out of the reader
const CHUNK_SIZE: usize = 256 * 1024;

/// Running CRC-32 and byte count of the decompressed output
struct Tally {
    crc: Crc,
    bytes: u64,
}

impl Tally {
    fn new() -> Self {
        Self {
            crc: Crc::new(),
            bytes: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.crc.update(data);
        self.bytes += data.len() as u64;
    }
}

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Underlying reader
    pub fn reader(&self) -> &Arc<R> {
        self.parser.reader()
    }

    /// Stream the decompressed contents of `entry` into `out`.
    ///
    /// Returns the number of bytes written. Fails if the entry is
    /// encrypted, uses an unsupported method, or if the produced bytes do
    /// not match the recorded size and CRC-32.
    pub async fn extract_to_writer<W>(&self, entry: &ZipFileEntry, out: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        if entry.is_encrypted() {
            bail!("{}: encrypted entries are not supported", entry.file_name);
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        let mut tally = Tally::new();

        match entry.compression_method {
            CompressionMethod::Stored => {
                self.copy_stored(entry, data_offset, out, &mut tally).await?
            }
            CompressionMethod::Deflate => {
                self.inflate(entry, data_offset, out, &mut tally).await?
            }
            CompressionMethod::Unknown(method) => bail!(
                "{}: unsupported compression method {} (only STORED and DEFLATE are supported)",
                entry.file_name,
                method
            ),
        }

        out.flush().await?;

        let written = tally.bytes;
        if written != entry.uncompressed_size {
            bail!(
                "{}: size mismatch (expected {} bytes, got {})",
                entry.file_name,
                entry.uncompressed_size,
                written
            );
        }
        if tally.crc.sum() != entry.crc32 {
            bail!(
                "{}: CRC-32 mismatch (expected {:08x}, got {:08x})",
                entry.file_name,
                entry.crc32,
                tally.crc.sum()
            );
        }

        Ok(written)
    }

    async fn copy_stored<W>(
        &self,
        entry: &ZipFileEntry,
        data_offset: u64,
        out: &mut W,
        tally: &mut Tally,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut remaining = entry.compressed_size;
        let mut pos = data_offset;
        let mut buf = vec![0u8; (remaining as usize).min(CHUNK_SIZE)];

        while remaining > 0 {
            let n = (remaining as usize).min(buf.len());
            self.parser.reader().read_exact_at(pos, &mut buf[..n]).await?;
            tally.update(&buf[..n]);
            out.write_all(&buf[..n]).await?;
            pos += n as u64;
            remaining -= n as u64;
        }

        Ok(())
    }

    async fn inflate<W>(
        &self,
        entry: &ZipFileEntry,
        data_offset: u64,
        out: &mut W,
        tally: &mut Tally,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        // Raw DEFLATE, no zlib header
        let mut inflater = Decompress::new(false);
        let mut input = vec![0u8; CHUNK_SIZE];
        let mut output = vec![0u8; CHUNK_SIZE];
        let mut remaining = entry.compressed_size;
        let mut pos = data_offset;

        loop {
            let n = (remaining as usize).min(CHUNK_SIZE);
            self.parser.reader().read_exact_at(pos, &mut input[..n]).await?;
            pos += n as u64;
            remaining -= n as u64;

            let flush = if remaining == 0 {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };

            let mut consumed = 0;
            loop {
                let in_before = inflater.total_in();
                let out_before = inflater.total_out();
                let status = inflater
                    .decompress(&input[consumed..n], &mut output, flush)
                    .with_context(|| format!("{}: corrupt DEFLATE stream", entry.file_name))?;
                let used = (inflater.total_in() - in_before) as usize;
                let produced = (inflater.total_out() - out_before) as usize;
                consumed += used;

                if produced > 0 {
                    tally.update(&output[..produced]);
                    out.write_all(&output[..produced]).await?;
                }

                if status == Status::StreamEnd {
                    return Ok(());
                }
                // Input exhausted and no output pending: fetch the next chunk
                if (consumed == n && produced < output.len()) || (used == 0 && produced == 0) {
                    break;
                }
            }

            if remaining == 0 {
                bail!("{}: truncated DEFLATE stream", entry.file_name);
            }
        }
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(entry.uncompressed_size as usize);
        self.extract_to_writer(entry, &mut buf).await?;
        Ok(buf)
    }

    /// Extract file to stdout
    pub async fn extract_to_stdout(&self, entry: &ZipFileEntry) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        self.extract_to_writer(entry, &mut stdout).await?;

        Ok(())
    }
}
