use std::io;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use flate2::{Crc, Decompress, FlushDecompress, Status};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::parser::ZipParser;
use super::structures::{ArchiveEntry, CompressionMethod};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::io::{LocalFileReader, ReadAt, read_exact_at};
use crate::stream::{EventBuffer, EventSource, PullAdapter, SourceListener};

/// An opened ZIP archive whose entries can be read as event sources.
pub struct Archive {
    reader: Arc<dyn ReadAt>,
    entries: Vec<ArchiveEntry>,
    config: BridgeConfig,
}

impl Archive {
    /// Parse the central directory of `reader`.
    pub async fn open(reader: Arc<dyn ReadAt>, config: BridgeConfig) -> Result<Self> {
        let entries = ZipParser::new(reader.as_ref()).list_entries().await?;
        debug!(entries = entries.len(), "opened archive");
        Ok(Self {
            reader,
            entries,
            config,
        })
    }

    /// Open the archive stored at `path`.
    pub async fn open_path(path: &Path, config: BridgeConfig) -> Result<Self> {
        let reader = LocalFileReader::new(path).map_err(|e| BridgeError::from_open(path, e))?;
        Self::open(Arc::new(reader), config).await
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ArchiveEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start producing `name`'s bytes into an event source.
    ///
    /// The producer task stays below the configured high-water mark and
    /// stops once the consumer detaches.
    pub async fn open_entry(&self, name: &str) -> Result<EntrySource> {
        let entry = self
            .entry(name)
            .cloned()
            .ok_or_else(|| BridgeError::SourceMissing { path: name.into() })?;
        if let CompressionMethod::Unknown(method) = entry.compression {
            return Err(anyhow::anyhow!(
                "Unsupported compression method {method} for {}",
                entry.name
            )
            .into());
        }
        let start = ZipParser::new(self.reader.as_ref())
            .data_offset(&entry)
            .await?;
        start
            .checked_add(entry.compressed_size)
            .filter(|end| *end <= self.reader.size())
            .ok_or_else(|| anyhow::anyhow!("Entry data of {} extends past end of file", entry.name))?;

        let buffer = Arc::new(EventBuffer::new(self.config.high_water_bytes()));
        let producer = tokio::spawn(produce(
            self.reader.clone(),
            entry,
            start,
            buffer.clone(),
            self.config.chunk_size,
        ));
        Ok(EntrySource { buffer, producer })
    }

    /// `name` as a demand-driven sequence of windows.
    pub async fn entry_stream(&self, name: &str) -> Result<PullAdapter<EntrySource>> {
        let source = self.open_entry(name).await?;
        Ok(PullAdapter::new(source, self.config.chunk_size))
    }
}

/// Event source over one archive entry, fed by a background task.
pub struct EntrySource {
    buffer: Arc<EventBuffer>,
    producer: JoinHandle<()>,
}

impl EventSource for EntrySource {
    fn subscribe(&self, listener: Arc<dyn SourceListener>) {
        self.buffer.subscribe(listener)
    }

    fn unsubscribe(&self) {
        self.buffer.unsubscribe();
        self.producer.abort();
    }

    fn read(&self, max_bytes: usize) -> io::Result<Option<Bytes>> {
        self.buffer.read(max_bytes)
    }
}

impl Drop for EntrySource {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

async fn produce(
    reader: Arc<dyn ReadAt>,
    entry: ArchiveEntry,
    start: u64,
    buffer: Arc<EventBuffer>,
    window: usize,
) {
    let result = match entry.compression {
        CompressionMethod::Deflate => inflate(reader.as_ref(), &entry, start, &buffer, window).await,
        _ => copy_stored(reader.as_ref(), &entry, start, &buffer, window).await,
    };
    match result {
        Ok(true) => buffer.finish(),
        Ok(false) => debug!(entry = %entry.name, "consumer detached; producer stopped"),
        Err(e) => {
            warn!(entry = %entry.name, error = %e, "archive entry failed");
            buffer.fail(e);
        }
    }
}

fn check_crc(entry: &ArchiveEntry, crc: &Crc) -> io::Result<()> {
    // amount() wraps at 4 GiB, so compare the low 32 bits of the size.
    if crc.sum() != entry.crc32 || crc.amount() != entry.size as u32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("checksum mismatch in {}", entry.name),
        ));
    }
    Ok(())
}

/// Copy a stored entry. Returns `Ok(false)` if the consumer went away.
async fn copy_stored(
    reader: &dyn ReadAt,
    entry: &ArchiveEntry,
    start: u64,
    buffer: &EventBuffer,
    window: usize,
) -> io::Result<bool> {
    let mut crc = Crc::new();
    let mut offset = start;
    let end = start.saturating_add(entry.compressed_size);
    while offset < end {
        if !buffer.ready().await {
            return Ok(false);
        }
        let len = (end - offset).min(window as u64) as usize;
        let mut chunk = vec![0u8; len];
        read_exact_at(reader, offset, &mut chunk).await?;
        crc.update(&chunk);
        offset += len as u64;
        buffer.push(Bytes::from(chunk));
    }
    check_crc(entry, &crc)?;
    Ok(true)
}

/// Inflate a raw DEFLATE entry window by window.
async fn inflate(
    reader: &dyn ReadAt,
    entry: &ArchiveEntry,
    start: u64,
    buffer: &EventBuffer,
    window: usize,
) -> io::Result<bool> {
    let mut inflater = Decompress::new(false);
    let mut crc = Crc::new();
    let mut offset = start;
    let mut remaining = entry.compressed_size;

    loop {
        let len = remaining.min(window as u64) as usize;
        let mut input = vec![0u8; len];
        read_exact_at(reader, offset, &mut input).await?;
        offset += len as u64;
        remaining -= len as u64;
        let flush = if remaining == 0 {
            FlushDecompress::Finish
        } else {
            FlushDecompress::None
        };

        let mut consumed = 0;
        loop {
            if !buffer.ready().await {
                return Ok(false);
            }
            let mut out = Vec::with_capacity(window);
            let before = inflater.total_in();
            let status = inflater
                .decompress_vec(&input[consumed..], &mut out, flush)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            consumed += (inflater.total_in() - before) as usize;

            let progressed = !out.is_empty();
            crc.update(&out);
            buffer.push(Bytes::from(out));

            if status == Status::StreamEnd {
                check_crc(entry, &crc)?;
                return Ok(true);
            }
            if consumed == input.len() && !progressed {
                break;
            }
        }

        if remaining == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("truncated deflate stream in {}", entry.name),
            ));
        }
    }
}
