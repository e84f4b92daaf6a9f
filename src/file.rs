//! A uniform handle over local files and archive entries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::fs;

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::stream::{ChunkStream, ChunkedFileSource};
use crate::zip::{Archive, ArchiveEntry};

enum Origin {
    Local(PathBuf),
    Entry {
        archive: Arc<Archive>,
        entry: ArchiveEntry,
    },
}

/// A payload with its metadata and three ways to consume it: streamed
/// windows, one contiguous buffer, or a [`Blob`].
pub struct SourceFile {
    path: String,
    name: String,
    size: u64,
    last_modified: i64,
    config: BridgeConfig,
    origin: Origin,
}

impl SourceFile {
    /// Stat a local file.
    pub async fn open(path: &Path, config: BridgeConfig) -> Result<Self> {
        let meta = fs::metadata(path)
            .await
            .map_err(|e| BridgeError::from_open(path, e))?;
        let last_modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Ok(Self {
            path: to_posix(path),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: meta.len(),
            last_modified,
            config,
            origin: Origin::Local(path.to_path_buf()),
        })
    }

    /// Describe an entry of an opened archive.
    pub fn from_entry(archive: Arc<Archive>, entry: ArchiveEntry) -> Self {
        let name = entry
            .name
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            path: entry.name.clone(),
            name,
            size: entry.size,
            last_modified: entry.last_modified_ms(),
            config: *archive.config(),
            origin: Origin::Entry { archive, entry },
        }
    }

    /// Logical path with `/` separators.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backing path on the local filesystem; `None` for archive entries.
    pub fn local_path(&self) -> Option<&Path> {
        match &self.origin {
            Origin::Local(path) => Some(path.as_path()),
            Origin::Entry { .. } => None,
        }
    }

    /// Milliseconds since the Unix epoch.
    pub fn last_modified(&self) -> i64 {
        self.last_modified
    }

    /// Stream the payload in windows of the configured size.
    pub async fn stream(&self) -> Result<ChunkStream> {
        match &self.origin {
            Origin::Local(path) => ChunkedFileSource::open(path, self.config.chunk_size).await,
            Origin::Entry { archive, entry } => {
                Ok(archive.entry_stream(&entry.name).await?.boxed())
            }
        }
    }

    /// The whole payload as one buffer.
    pub async fn array_buffer(&self) -> Result<Bytes> {
        match &self.origin {
            Origin::Local(path) => fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| BridgeError::from_open(path.as_path(), e)),
            Origin::Entry { .. } => {
                let mut stream = self.stream().await?;
                let mut out = BytesMut::with_capacity(self.size.min(usize::MAX as u64) as usize);
                while let Some(chunk) = stream.next().await {
                    out.extend_from_slice(&chunk?);
                }
                Ok(out.freeze())
            }
        }
    }

    pub async fn blob(&self) -> Result<Blob> {
        Ok(Blob {
            data: self.array_buffer().await?,
        })
    }
}

/// An immutable payload snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    data: Bytes,
}

impl Blob {
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// A sub-range sharing the same storage. Out-of-range bounds are clamped.
    pub fn slice(&self, start: usize, end: usize) -> Blob {
        let end = end.min(self.data.len());
        let start = start.min(end);
        Blob {
            data: self.data.slice(start..end),
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

fn to_posix(path: &Path) -> String {
    let text = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        text.into_owned()
    } else {
        text.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_file_metadata_and_buffers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"not really a jpeg").unwrap();

        let file = SourceFile::open(&path, BridgeConfig::default().with_chunk_size(4))
            .await
            .unwrap();
        assert_eq!(file.name(), "photo.jpg");
        assert_eq!(file.size(), 17);
        assert!(file.last_modified() > 0);
        assert!(file.path().ends_with("/photo.jpg"));
        assert_eq!(file.local_path(), Some(path.as_path()));

        assert_eq!(file.array_buffer().await.unwrap(), &b"not really a jpeg"[..]);
        let blob = file.blob().await.unwrap();
        assert_eq!(blob.size(), 17);
        assert_eq!(blob.slice(4, 10).bytes(), &b"really"[..]);
        assert_eq!(blob.slice(15, 99).size(), 2);

        let chunks: Vec<Bytes> = file.stream().await.unwrap().map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks.len(), 5);
    }

    #[tokio::test]
    async fn vanished_file_is_source_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("temp.bin");
        std::fs::write(&path, b"soon gone").unwrap();
        let file = SourceFile::open(&path, BridgeConfig::default()).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            file.stream().await.err().unwrap(),
            BridgeError::SourceMissing { .. }
        ));
        assert!(matches!(
            file.array_buffer().await.unwrap_err(),
            BridgeError::SourceMissing { .. }
        ));
    }
}
