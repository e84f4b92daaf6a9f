use super::ReadAt;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

/// Local file reader with random access support.
///
/// Owns the descriptor exclusively; it is closed exactly once when the
/// reader is dropped, whichever path drops it.
pub struct LocalFileReader {
    file: std::fs::File,
    path: PathBuf,
    size: u64,
}

impl LocalFileReader {
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();
        tracing::debug!(path = %path.display(), size, "opened file descriptor");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LocalFileReader {
    fn drop(&mut self) {
        tracing::debug!(path = %self.path.display(), "released file descriptor");
    }
}

#[async_trait]
impl ReadAt for LocalFileReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_at(buf, offset)
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            // seek_read moves the OS cursor, but every call passes its own offset
            self.file.seek_read(buf, offset)
        }

        #[cfg(not(any(unix, windows)))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read(buf)
        }
    }

    fn size(&self) -> u64 {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::read_exact_at;
    use tempfile::TempDir;

    #[tokio::test]
    async fn reads_at_explicit_offsets() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let reader = LocalFileReader::new(&path).unwrap();
        assert_eq!(reader.size(), 10);

        let mut buf = [0u8; 4];
        assert_eq!(reader.read_at(6, &mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"6789");

        // Earlier offsets are still reachable; there is no shared cursor.
        read_exact_at(&reader, 2, &mut buf).await.unwrap();
        assert_eq!(&buf, b"2345");

        assert_eq!(reader.read_at(10, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn read_exact_reports_short_reads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        let reader = LocalFileReader::new(&path).unwrap();
        let mut buf = [0u8; 8];
        let err = read_exact_at(&reader, 0, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = LocalFileReader::new(&dir.path().join("nope")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
