use anyhow::{Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};
use chrono::NaiveDate;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl From<u16> for CompressionMethod {
    fn from(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            other => CompressionMethod::Unknown(other),
        }
    }
}

/// Where the central directory lives, from the EOCD or its ZIP64 twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub entries: u64,
    pub size: u64,
    pub offset: u64,
}

/// End of Central Directory record (22 bytes plus comment).
pub struct EndOfCentralDirectory {
    pub location: DirectoryLocation,
    pub comment_len: u16,
    zip64: bool,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn parse(data: &[u8]) -> Result<Self> {
        ensure!(
            data.len() >= Self::SIZE && &data[0..4] == Self::SIGNATURE,
            "Invalid End of Central Directory"
        );
        let disk_entries = LittleEndian::read_u16(&data[8..]);
        let total_entries = LittleEndian::read_u16(&data[10..]);
        let size = LittleEndian::read_u32(&data[12..]);
        let offset = LittleEndian::read_u32(&data[16..]);
        Ok(Self {
            location: DirectoryLocation {
                entries: total_entries as u64,
                size: size as u64,
                offset: offset as u64,
            },
            comment_len: LittleEndian::read_u16(&data[20..]),
            zip64: disk_entries == u16::MAX
                || total_entries == u16::MAX
                || size == u32::MAX
                || offset == u32::MAX,
        })
    }

    /// Any saturated field means the real values live in the ZIP64 record.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }
}

/// ZIP64 End of Central Directory Locator (20 bytes).
pub struct Zip64Locator;

impl Zip64Locator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    /// Returns the offset of the ZIP64 EOCD record.
    pub fn parse(data: &[u8]) -> Result<u64> {
        ensure!(
            data.len() >= Self::SIZE && &data[0..4] == Self::SIGNATURE,
            "Invalid ZIP64 locator"
        );
        Ok(LittleEndian::read_u64(&data[8..]))
    }
}

/// ZIP64 End of Central Directory record (56 bytes minimum).
pub struct Zip64EndOfCentralDirectory;

impl Zip64EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn parse(data: &[u8]) -> Result<DirectoryLocation> {
        ensure!(
            data.len() >= Self::MIN_SIZE && &data[0..4] == Self::SIGNATURE,
            "Invalid ZIP64 End of Central Directory"
        );
        Ok(DirectoryLocation {
            entries: LittleEndian::read_u64(&data[32..]),
            size: LittleEndian::read_u64(&data[40..]),
            offset: LittleEndian::read_u64(&data[48..]),
        })
    }
}

/// Central Directory File Header (46 bytes plus variable fields).
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (30 bytes plus variable fields).
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// One file or directory recorded in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub compression: CompressionMethod,
    pub compressed_size: u64,
    pub size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub dos_time: u16,
    pub dos_date: u16,
    pub is_directory: bool,
}

impl ArchiveEntry {
    /// Parse one header from the front of `data`; returns the entry and the
    /// number of bytes it occupied.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        ensure!(
            data.len() >= CDFH_MIN_SIZE && &data[0..4] == CDFH_SIGNATURE,
            "Invalid Central Directory File Header"
        );
        let name_len = LittleEndian::read_u16(&data[28..]) as usize;
        let extra_len = LittleEndian::read_u16(&data[30..]) as usize;
        let comment_len = LittleEndian::read_u16(&data[32..]) as usize;
        let total = CDFH_MIN_SIZE + name_len + extra_len + comment_len;
        ensure!(data.len() >= total, "Truncated Central Directory File Header");

        let name_end = CDFH_MIN_SIZE + name_len;
        let name = String::from_utf8_lossy(&data[CDFH_MIN_SIZE..name_end]).into_owned();

        let mut entry = Self {
            is_directory: name.ends_with('/'),
            name,
            compression: LittleEndian::read_u16(&data[10..]).into(),
            dos_time: LittleEndian::read_u16(&data[12..]),
            dos_date: LittleEndian::read_u16(&data[14..]),
            crc32: LittleEndian::read_u32(&data[16..]),
            compressed_size: LittleEndian::read_u32(&data[20..]) as u64,
            size: LittleEndian::read_u32(&data[24..]) as u64,
            lfh_offset: LittleEndian::read_u32(&data[42..]) as u64,
        };
        entry.apply_zip64_extra(&data[name_end..name_end + extra_len])?;
        Ok((entry, total))
    }

    /// Replace saturated 32-bit fields with values from the 0x0001 extra
    /// field, in the order the format lists them.
    fn apply_zip64_extra(&mut self, mut extra: &[u8]) -> Result<()> {
        while extra.len() >= 4 {
            let id = LittleEndian::read_u16(extra);
            let len = LittleEndian::read_u16(&extra[2..]) as usize;
            let body_end = (4 + len).min(extra.len());
            let mut body = &extra[4..body_end];
            if id == 0x0001 {
                for field in [&mut self.size, &mut self.compressed_size, &mut self.lfh_offset] {
                    if *field == u32::MAX as u64 {
                        if body.len() < 8 {
                            bail!("Truncated ZIP64 extra field");
                        }
                        *field = LittleEndian::read_u64(body);
                        body = &body[8..];
                    }
                }
            }
            extra = &extra[body_end..];
        }
        Ok(())
    }

    /// Modification time in milliseconds since the Unix epoch.
    ///
    /// DOS timestamps carry no zone and are read as UTC. Invalid stamps map
    /// to `0`.
    pub fn last_modified_ms(&self) -> i64 {
        let day = (self.dos_date & 0x1F) as u32;
        let month = ((self.dos_date >> 5) & 0x0F) as u32;
        let year = ((self.dos_date >> 9) & 0x7F) as i32 + 1980;
        let second = ((self.dos_time & 0x1F) * 2) as u32;
        let minute = ((self.dos_time >> 5) & 0x3F) as u32;
        let hour = ((self.dos_time >> 11) & 0x1F) as u32;

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, minute, second))
            .map(|stamp| stamp.and_utc().timestamp_millis())
            .unwrap_or(0)
    }
}
