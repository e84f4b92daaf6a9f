//! ZIP archives as a source of per-entry byte streams.
//!
//! - [`structures`]: fixed records of the format (EOCD, ZIP64, headers)
//! - [`parser`]: locating and reading the central directory through
//!   [`ReadAt`](crate::io::ReadAt)
//! - [`archive`]: [`Archive`], which opens a named entry as an
//!   [`EventSource`](crate::stream::EventSource) fed by a producer task
//!
//! The EOCD is read first from the end of the file, then the central
//! directory in one request, so listing never touches entry data.
//!
//! Supported: ZIP64, STORED and DEFLATE, CRC-32 verification.
//! Not supported: encryption, multi-disk archives, other compression
//! methods.

mod archive;
mod parser;
mod structures;

pub use archive::{Archive, EntrySource};
pub use parser::ZipParser;
pub use structures::{ArchiveEntry, CompressionMethod, DirectoryLocation};
