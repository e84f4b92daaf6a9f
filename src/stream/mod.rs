//! Moving bytes between pull, push and random-access models.
//!
//! ## Architecture
//!
//! - [`chunked`]: windows read from a [`ReadAt`](crate::io::ReadAt) at a
//!   tracked offset, on demand
//! - [`event`]: the event-driven source contract and [`EventBuffer`], a
//!   bounded buffer that speaks it
//! - [`pull`]: [`PullAdapter`], the demand-driven view over an event source
//! - [`push`]: [`PushSource`], the event-driven view over a demand-driven
//!   stream
//! - [`sink`]: [`AtomicFileSink`], which writes a push source all-or-nothing
//!
//! Reads from a local file or from an archive entry both end up as a
//! [`ChunkStream`]; writes go `ChunkStream -> PushSource -> AtomicFileSink`.

pub mod chunked;
pub mod event;
pub mod pull;
pub mod push;
pub mod sink;

pub use chunked::ChunkedFileSource;
pub use event::{EventBuffer, EventSource, SourceEvent, SourceListener};
pub use pull::PullAdapter;
pub use push::{PushEvent, PushSource};
pub use sink::{AtomicFileSink, write_stream};

use bytes::Bytes;
use futures::stream::BoxStream;

/// An immutable window of bytes; ownership moves to the consumer on delivery.
pub type ByteWindow = Bytes;

/// The uniform demand-driven byte sequence.
pub type ChunkStream = BoxStream<'static, crate::error::Result<ByteWindow>>;
