//! Central directory parsing.
//!
//! ZIP files are read from the end: locate the End of Central Directory,
//! follow the ZIP64 locator when fields are saturated, then read the whole
//! central directory in one request. Entry data offsets come from each
//! entry's Local File Header, whose variable fields may differ from the
//! central copy.

use anyhow::{Context, Result, bail, ensure};
use byteorder::{ByteOrder, LittleEndian};

use crate::io::{ReadAt, read_exact_at};

use super::structures::*;

/// Maximum ZIP comment size allowed by the format.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;

/// Reads archive metadata from any [`ReadAt`].
pub struct ZipParser<'a, R: ReadAt + ?Sized> {
    reader: &'a R,
    size: u64,
}

impl<'a, R: ReadAt + ?Sized> ZipParser<'a, R> {
    pub fn new(reader: &'a R) -> Self {
        Self {
            size: reader.size(),
            reader,
        }
    }

    /// Find the EOCD record and its offset.
    ///
    /// Tries the comment-less position first, then scans backwards through
    /// the largest possible comment.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let record = EndOfCentralDirectory::SIZE as u64;
        ensure!(self.size >= record, "Not a valid ZIP file: too small");

        let offset = self.size - record;
        let mut tail = vec![0u8; EndOfCentralDirectory::SIZE];
        read_exact_at(self.reader, offset, &mut tail).await?;
        if &tail[0..4] == EndOfCentralDirectory::SIGNATURE && tail[20..22] == [0, 0] {
            return Ok((EndOfCentralDirectory::parse(&tail)?, offset));
        }

        let window = (MAX_COMMENT_SIZE + record).min(self.size);
        let start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        read_exact_at(self.reader, start, &mut buf).await?;

        let last = buf.len() - EndOfCentralDirectory::SIZE;
        for i in (0..=last).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            // The comment must run exactly to the end of the file.
            let comment_len = LittleEndian::read_u16(&buf[i + 20..]) as usize;
            if comment_len == last - i {
                let eocd = EndOfCentralDirectory::parse(&buf[i..])?;
                return Ok((eocd, start + i as u64));
            }
        }

        bail!("Not a valid ZIP file")
    }

    /// Resolve the central directory location, following ZIP64 if needed.
    pub async fn directory_location(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        if !eocd.is_zip64() {
            return Ok(eocd.location);
        }

        let locator_offset = eocd_offset
            .checked_sub(Zip64Locator::SIZE as u64)
            .context("ZIP64 locator out of range")?;
        let mut locator = vec![0u8; Zip64Locator::SIZE];
        read_exact_at(self.reader, locator_offset, &mut locator).await?;
        let record_offset = Zip64Locator::parse(&locator)?;

        let mut record = vec![0u8; Zip64EndOfCentralDirectory::MIN_SIZE];
        read_exact_at(self.reader, record_offset, &mut record).await?;
        Zip64EndOfCentralDirectory::parse(&record)
    }

    /// Every entry recorded in the central directory.
    pub async fn list_entries(&self) -> Result<Vec<ArchiveEntry>> {
        let location = self.directory_location().await?;
        ensure!(
            location.offset.saturating_add(location.size) <= self.size,
            "Central directory extends past end of file"
        );

        let mut directory = vec![0u8; location.size as usize];
        read_exact_at(self.reader, location.offset, &mut directory).await?;

        let mut entries = Vec::with_capacity(location.entries.min(u16::MAX as u64) as usize);
        let mut rest = directory.as_slice();
        for index in 0..location.entries {
            let (entry, used) = ArchiveEntry::parse(rest)
                .with_context(|| format!("central directory entry {index}"))?;
            entries.push(entry);
            rest = &rest[used..];
        }
        Ok(entries)
    }

    /// Offset of the first byte of `entry`'s stored data.
    pub async fn data_offset(&self, entry: &ArchiveEntry) -> Result<u64> {
        let mut header = [0u8; LFH_SIZE];
        read_exact_at(self.reader, entry.lfh_offset, &mut header).await?;
        ensure!(&header[0..4] == LFH_SIGNATURE, "Invalid Local File Header");

        let name_len = LittleEndian::read_u16(&header[26..]) as u64;
        let extra_len = LittleEndian::read_u16(&header[28..]) as u64;
        entry
            .lfh_offset
            .checked_add(LFH_SIZE as u64 + name_len + extra_len)
            .context("Local File Header offset out of range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;

    /// One Local File Header placed at an arbitrary offset of a huge file.
    struct SparseHeader {
        at: u64,
        header: Vec<u8>,
    }

    #[async_trait]
    impl ReadAt for SparseHeader {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            if offset != self.at {
                return Ok(0);
            }
            let n = buf.len().min(self.header.len());
            buf[..n].copy_from_slice(&self.header[..n]);
            Ok(n)
        }

        fn size(&self) -> u64 {
            u64::MAX
        }
    }

    fn entry_at(lfh_offset: u64) -> ArchiveEntry {
        ArchiveEntry {
            name: "x".into(),
            compression: CompressionMethod::Stored,
            compressed_size: 0,
            size: 0,
            crc32: 0,
            lfh_offset,
            dos_time: 0,
            dos_date: 0,
            is_directory: false,
        }
    }

    fn header(name_len: u16) -> Vec<u8> {
        let mut header = vec![0u8; LFH_SIZE];
        header[0..4].copy_from_slice(LFH_SIGNATURE);
        LittleEndian::write_u16(&mut header[26..], name_len);
        header
    }

    #[tokio::test]
    async fn data_offset_skips_the_variable_fields() {
        let reader = SparseHeader { at: 100, header: header(5) };
        let offset = ZipParser::new(&reader).data_offset(&entry_at(100)).await.unwrap();
        assert_eq!(offset, 100 + LFH_SIZE as u64 + 5);
    }

    #[tokio::test]
    async fn data_offset_near_u64_max_is_rejected() {
        let at = u64::MAX - 40;
        let reader = SparseHeader { at, header: header(200) };
        assert!(ZipParser::new(&reader).data_offset(&entry_at(at)).await.is_err());
    }
}
