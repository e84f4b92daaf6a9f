//! Error types shared by every stream in the bridge.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the library.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Failures surfaced by sources, adapters and sinks.
///
/// Every variant reaches the immediate caller as a rejected operation.
/// [`BridgeError::CancelledByConsumer`] marks a clean teardown rather than a
/// processing failure and is never logged as one.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The file vanished between stat and read.
    #[error("source missing: {}", path.display())]
    SourceMissing { path: PathBuf },

    #[error("read failure: {0}")]
    ReadFailure(#[source] io::Error),

    /// I/O error while writing the destination, including a full disk.
    #[error("write failure on {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The underlying archive entry source signaled an error.
    #[error("archive entry error: {0}")]
    ArchiveEntryError(#[source] io::Error),

    #[error("cancelled by consumer")]
    CancelledByConsumer,

    /// A second pull was issued while another one is still parked.
    #[error("a read is already pending on this stream")]
    ConcurrentPull,

    #[error(transparent)]
    InvalidArchive(#[from] anyhow::Error),
}

impl BridgeError {
    /// Maps an open/stat error on `path` to the taxonomy.
    pub(crate) fn from_open(path: impl Into<PathBuf>, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            BridgeError::SourceMissing { path: path.into() }
        } else {
            BridgeError::ReadFailure(err)
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BridgeError::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// True for teardown that should not be reported as a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, BridgeError::CancelledByConsumer)
    }
}
