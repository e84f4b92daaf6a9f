//! All-or-nothing file writes from a push source.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::{ChunkStream, PushEvent, PushSource};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// Writable handle behind a [`PartialOutputFile`].
#[async_trait]
trait Destination: AsyncWrite + Unpin + Send {
    /// Make written bytes durable.
    async fn sync(&mut self) -> io::Result<()>;
}

#[async_trait]
impl Destination for fs::File {
    async fn sync(&mut self) -> io::Result<()> {
        self.sync_all().await
    }
}

/// A destination that is still being written.
///
/// Unless [`promote`](Self::promote) is reached, the file is removed: on the
/// error path explicitly before the error is returned, and from `Drop` when
/// the writing future is abandoned.
struct PartialOutputFile<W: Destination = fs::File> {
    path: PathBuf,
    file: Option<W>,
    settled: bool,
}

impl PartialOutputFile {
    async fn create(path: &Path) -> io::Result<Self> {
        let file = fs::File::create(path).await?;
        Ok(Self::with_writer(path, file))
    }
}

impl<W: Destination> PartialOutputFile<W> {
    fn with_writer(path: &Path, file: W) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Some(file),
            settled: false,
        }
    }

    async fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes).await,
            None => Err(io::Error::other("destination already closed")),
        }
    }

    /// Flush and sync; the payload is complete once this returns.
    async fn promote(mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync().await?;
        }
        self.settled = true;
        debug!(path = %self.path.display(), "destination complete");
        Ok(())
    }

    /// Close the handle and delete whatever was written.
    async fn discard(mut self) {
        drop(self.file.take());
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "removed partial destination"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not remove partial destination"),
        }
        self.settled = true;
    }
}

impl<W: Destination> Drop for PartialOutputFile<W> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        drop(self.file.take());
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove abandoned destination");
            }
        }
    }
}

/// Writes a [`PushSource`] to a path so that the path ends up holding the
/// complete payload or not existing at all.
///
/// Bytes are appended in arrival order. A source error or a write error
/// stops writing, closes the destination, deletes it, and is then returned.
pub struct AtomicFileSink {
    path: PathBuf,
}

impl AtomicFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume `source` until it ends. Returns the number of bytes written.
    pub async fn write(self, source: PushSource) -> Result<u64> {
        let partial = PartialOutputFile::create(&self.path)
            .await
            .map_err(|e| BridgeError::write(&self.path, e))?;
        drain_into(partial, source).await
    }
}

async fn drain_into<W: Destination>(
    mut partial: PartialOutputFile<W>,
    mut source: PushSource,
) -> Result<u64> {
    let path = partial.path.clone();
    let mut written = 0u64;
    loop {
        match source.next_event().await {
            PushEvent::Data(bytes) => {
                if let Err(e) = partial.append(&bytes).await {
                    drop(source);
                    partial.discard().await;
                    return Err(BridgeError::write(path, e));
                }
                written += bytes.len() as u64;
            }
            PushEvent::End => break,
            PushEvent::Error(err) => {
                if !err.is_cancellation() {
                    warn!(path = %path.display(), written, error = %err, "source failed mid-write");
                }
                partial.discard().await;
                return Err(err);
            }
        }
    }

    // A failed flush drops the guard unsettled, which removes the file.
    partial
        .promote()
        .await
        .map_err(|e| BridgeError::write(&path, e))?;
    Ok(written)
}

/// Write a demand-driven stream to `path` atomically.
pub async fn write_stream(path: &Path, stream: ChunkStream, config: &BridgeConfig) -> Result<u64> {
    let source = PushSource::spawn(stream, config.push_capacity);
    AtomicFileSink::new(path).write(source).await
}
