use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use std::io::Cursor;
use std::time::SystemTime;

use anyhow::{Result, bail};

use crate::extract::EntryTimes;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid End of Central Directory");
        }

        // Verify signature
        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid End of Central Directory");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            bail!("Invalid ZIP64 format");
        }

        if &data[0..4] != Self::SIGNATURE {
            bail!("Invalid ZIP64 format");
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Extra field carrying the Info-ZIP extended timestamp ("UT")
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;
/// Extra field carrying NTFS FILETIME attributes
pub const NTFS_EXTRA_ID: u16 = 0x000a;
/// Extra field carrying ZIP64 sizes and offsets
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// General purpose flag bit: entry data is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// MS-DOS directory attribute in the low byte of the external attributes
pub const DOS_DIRECTORY_ATTR: u32 = 0x10;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01
const FILETIME_UNIX_OFFSET: u64 = 11_644_473_600;

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub flags: u16,
    pub external_attrs: u32,
    pub is_directory: bool,
    pub comment: Option<String>,
    /// Timestamps from the UT or NTFS extra fields, if any
    pub extended_times: EntryTimes,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// DOS modification stamp interpreted in local time.
    ///
    /// Returns `None` for out-of-range fields (e.g. a zeroed date).
    pub fn dos_modified(&self) -> Option<SystemTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        let naive = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)?
            .and_hms_opt(hour as u32, minute as u32, second as u32)?;
        let local = Local.from_local_datetime(&naive).earliest()?;
        Some(SystemTime::from(local))
    }

    /// Whether the entry data is encrypted
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Effective timestamps: extended fields win over the DOS stamp
    pub fn times(&self) -> EntryTimes {
        EntryTimes {
            modified: self.extended_times.modified.or_else(|| self.dos_modified()),
            accessed: self.extended_times.accessed,
            created: self.extended_times.created,
        }
    }
}

/// Convert Unix seconds from a UT extra field.
pub fn unix_seconds_to_system_time(secs: i64) -> Option<SystemTime> {
    DateTime::from_timestamp(secs, 0).map(SystemTime::from)
}

/// Convert a Windows FILETIME (100ns ticks since 1601) from an NTFS extra field.
pub fn filetime_to_system_time(ticks: u64) -> Option<SystemTime> {
    if ticks == 0 {
        return None;
    }
    let secs = (ticks / 10_000_000) as i64 - FILETIME_UNIX_OFFSET as i64;
    let nanos = ((ticks % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).map(SystemTime::from)
}
