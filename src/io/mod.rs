mod local;

pub use local::LocalFileReader;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;

/// Random access reads at an explicit offset.
///
/// Readers never rely on an implicit cursor, so the same handle can be
/// shared between a chunked source and any other reader of the file.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer.
    ///
    /// Returns the number of bytes read; `0` means end of data.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

#[async_trait]
impl<R: ReadAt + ?Sized> ReadAt for Arc<R> {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf).await
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Fill `buf` completely, issuing as many reads as needed.
pub async fn read_exact_at<R: ReadAt + ?Sized>(
    reader: &R,
    mut offset: u64,
    buf: &mut [u8],
) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read_at(offset, &mut buf[filled..]).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read at offset {offset}"),
            ));
        }
        filled += n;
        offset += n as u64;
    }
    Ok(())
}
