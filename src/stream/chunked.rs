//! Pull-driven windows over a random-access file.

use std::path::Path;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::ChunkStream;
use crate::error::{BridgeError, Result};
use crate::io::{LocalFileReader, ReadAt};

/// Where the next read starts. Dropping the cursor releases the reader.
enum Cursor<R> {
    Open { reader: R, offset: u64 },
    Closed,
}

/// Reads a file as a lazy, finite sequence of windows.
///
/// Every pull reads at the tracked offset and advances by the number of
/// bytes actually read. A zero-byte read ends the sequence; a failed read
/// yields one [`BridgeError::ReadFailure`] and ends it. The reader is owned
/// by the stream, so exhaustion, failure, and dropping the stream early
/// all release it exactly once.
pub struct ChunkedFileSource;

impl ChunkedFileSource {
    /// Open `path` and stream it in `window`-sized chunks.
    pub async fn open(path: &Path, window: usize) -> Result<ChunkStream> {
        let owned = path.to_path_buf();
        let reader = tokio::task::spawn_blocking(move || LocalFileReader::new(&owned))
            .await
            .map_err(|e| BridgeError::ReadFailure(std::io::Error::other(e)))?
            .map_err(|e| BridgeError::from_open(path, e))?;
        Ok(Self::from_reader(reader, window))
    }

    /// Stream any [`ReadAt`] from offset 0.
    pub fn from_reader<R: ReadAt + 'static>(reader: R, window: usize) -> ChunkStream {
        let window = window.max(1);
        stream::unfold(Cursor::Open { reader, offset: 0 }, move |cursor| async move {
            let Cursor::Open { reader, offset } = cursor else {
                return None;
            };

            let mut buf = vec![0u8; window];
            match reader.read_at(offset, &mut buf).await {
                Ok(0) => {
                    debug!(offset, "chunked source exhausted");
                    None
                }
                Ok(n) => {
                    buf.truncate(n);
                    let next = Cursor::Open {
                        reader,
                        offset: offset + n as u64,
                    };
                    Some((Ok(Bytes::from(buf)), next))
                }
                Err(err) => {
                    warn!(offset, error = %err, "chunked read failed");
                    drop(reader);
                    Some((Err(BridgeError::ReadFailure(err)), Cursor::Closed))
                }
            }
        })
        .fuse()
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Wraps a reader and tracks how many are still alive.
    struct Counted<R> {
        inner: R,
        live: Arc<AtomicUsize>,
        fail_at: Option<u64>,
    }

    impl<R> Counted<R> {
        fn new(inner: R, live: &Arc<AtomicUsize>) -> Self {
            live.fetch_add(1, Ordering::SeqCst);
            Self {
                inner,
                live: live.clone(),
                fail_at: None,
            }
        }
    }

    impl<R> Drop for Counted<R> {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl<R: ReadAt> ReadAt for Counted<R> {
        async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
            if self.fail_at.is_some_and(|at| offset >= at) {
                return Err(io::Error::other("disk went away"));
            }
            self.inner.read_at(offset, buf).await
        }

        fn size(&self) -> u64 {
            self.inner.size()
        }
    }

    fn write_file(dir: &TempDir, name: &str, len: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        std::fs::write(&path, data).unwrap();
        path
    }

    #[tokio::test]
    async fn ten_mib_file_yields_three_windows() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "big.bin", 10 * 1024 * 1024);

        let stream = ChunkedFileSource::open(&path, crate::config::DEFAULT_CHUNK_SIZE)
            .await
            .unwrap();
        let chunks: Vec<Bytes> = stream.map(|c| c.unwrap()).collect().await;

        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4 << 20, 4 << 20, 2 << 20]);
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn empty_file_ends_immediately() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "empty.bin", 0);
        let mut stream = ChunkedFileSource::open(&path, 8).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = ChunkedFileSource::open(&dir.path().join("gone.bin"), 8)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::SourceMissing { .. }));
    }

    #[tokio::test]
    async fn exhaustion_releases_the_reader() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "small.bin", 20);
        let live = Arc::new(AtomicUsize::new(0));

        let reader = Counted::new(LocalFileReader::new(&path).unwrap(), &live);
        let mut stream = ChunkedFileSource::from_reader(reader, 8);
        let mut total = 0;
        while let Some(chunk) = stream.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 20);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_after_first_window_releases_the_reader() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "three.bin", 24);
        let live = Arc::new(AtomicUsize::new(0));

        let reader = Counted::new(LocalFileReader::new(&path).unwrap(), &live);
        let mut stream = ChunkedFileSource::from_reader(reader, 8);
        assert_eq!(stream.next().await.unwrap().unwrap().len(), 8);
        assert_eq!(live.load(Ordering::SeqCst), 1);

        drop(stream);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_failure_is_surfaced_once_and_releases() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "flaky.bin", 24);
        let live = Arc::new(AtomicUsize::new(0));

        let mut reader = Counted::new(LocalFileReader::new(&path).unwrap(), &live);
        reader.fail_at = Some(8);
        let mut stream = ChunkedFileSource::from_reader(reader, 8);

        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(BridgeError::ReadFailure(_)))
        ));
        assert_eq!(live.load(Ordering::SeqCst), 0);
        assert!(stream.next().await.is_none());
    }
}
