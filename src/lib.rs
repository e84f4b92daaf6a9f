//! # zipbridge
//!
//! Streaming I/O between local files, ZIP archive entries and destination
//! files, with bounded memory.
//!
//! Every payload is consumed as a demand-driven sequence of fixed-size
//! windows ([`stream::ChunkStream`]). Local files are read window by window
//! with [`stream::ChunkedFileSource`]; archive entries, which are produced
//! by a background task and announce data through events, are turned into
//! the same pull shape by [`stream::PullAdapter`]. A pull sequence can be
//! republished as pushed events ([`stream::PushSource`]) and written to disk
//! by [`stream::AtomicFileSink`], which leaves either the full payload or no
//! file at all.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use zipbridge::{Archive, BridgeConfig, write_stream};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> zipbridge::Result<()> {
//!     let config = BridgeConfig::default();
//!     let archive = Archive::open_path(Path::new("bundle.zip"), config).await?;
//!     let stream = archive.entry_stream("assets/logo.png").await?.boxed();
//!     write_stream(Path::new("logo.png"), stream, &config).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod file;
pub mod inflight;
pub mod io;
pub mod stream;
pub mod walk;
pub mod zip;

pub use cli::Cli;
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use file::{Blob, SourceFile};
pub use inflight::{InFlight, PayloadLoader};
pub use io::{LocalFileReader, ReadAt};
pub use stream::{
    AtomicFileSink, ChunkStream, ChunkedFileSource, PullAdapter, PushEvent, PushSource,
    write_stream,
};
pub use walk::{list_files, valid_paths};
pub use crate::zip::{Archive, ArchiveEntry};
