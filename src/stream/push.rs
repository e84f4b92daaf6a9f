//! Republishes a demand-driven stream as data/end/error events.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::ChunkStream;
use crate::error::BridgeError;

/// Events a [`PushSource`] hands to its consumer, in production order.
#[derive(Debug)]
pub enum PushEvent {
    Data(Bytes),
    End,
    Error(BridgeError),
}

/// Event-driven view over a [`ChunkStream`].
///
/// A drain task pulls the stream and forwards each window as
/// [`PushEvent::Data`], then exactly one [`PushEvent::End`] or
/// [`PushEvent::Error`]. The channel is bounded, so the task only pulls
/// again once the consumer has taken the previous event. It never pulls
/// after an error. Dropping the source stops the task and drops the stream.
pub struct PushSource {
    events: mpsc::Receiver<PushEvent>,
    drain: JoinHandle<()>,
    terminated: bool,
}

impl PushSource {
    /// Spawn the drain task for `stream` on the current runtime.
    pub fn spawn(mut stream: ChunkStream, capacity: usize) -> Self {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let drain = tokio::spawn(async move {
            loop {
                let event = match stream.next().await {
                    Some(Ok(bytes)) => PushEvent::Data(bytes),
                    Some(Err(err)) => PushEvent::Error(err),
                    None => PushEvent::End,
                };
                let last = !matches!(event, PushEvent::Data(_));
                if tx.send(event).await.is_err() {
                    debug!("push consumer went away; stopping drain");
                    return;
                }
                if last {
                    return;
                }
            }
        });
        Self {
            events,
            drain,
            terminated: false,
        }
    }

    /// Next event. After `End` or `Error` this keeps returning `End`.
    pub async fn next_event(&mut self) -> PushEvent {
        if self.terminated {
            return PushEvent::End;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            // The drain task died without a terminal event.
            None => PushEvent::Error(BridgeError::ReadFailure(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "push source closed before end",
            ))),
        };
        if !matches!(event, PushEvent::Data(_)) {
            self.terminated = true;
        }
        event
    }
}

impl Drop for PushSource {
    fn drop(&mut self) {
        self.drain.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted(
        items: Vec<crate::error::Result<Bytes>>,
        pulls: &Arc<AtomicUsize>,
    ) -> ChunkStream {
        let pulls = pulls.clone();
        stream::iter(items)
            .inspect(move |_| {
                pulls.fetch_add(1, Ordering::SeqCst);
            })
            .boxed()
    }

    #[tokio::test]
    async fn republishes_data_then_end() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let mut source = PushSource::spawn(
            counted(
                vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))],
                &pulls,
            ),
            1,
        );

        let mut seen = Vec::new();
        loop {
            match source.next_event().await {
                PushEvent::Data(bytes) => seen.extend_from_slice(&bytes),
                PushEvent::End => break,
                PushEvent::Error(err) => panic!("unexpected error: {err}"),
            }
        }
        assert_eq!(seen, b"abcd");
        assert!(matches!(source.next_event().await, PushEvent::End));
    }

    #[tokio::test]
    async fn stops_pulling_after_an_error() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let items = vec![
            Ok(Bytes::from_static(b"one")),
            Err(BridgeError::ReadFailure(io::Error::other("bad sector"))),
            Ok(Bytes::from_static(b"never")),
        ];
        let mut source = PushSource::spawn(counted(items, &pulls), 4);

        assert!(matches!(source.next_event().await, PushEvent::Data(_)));
        assert!(matches!(
            source.next_event().await,
            PushEvent::Error(BridgeError::ReadFailure(_))
        ));
        tokio::task::yield_now().await;
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn bounded_channel_applies_backpressure() {
        let pulls = Arc::new(AtomicUsize::new(0));
        let items = (0..10).map(|i| Ok(Bytes::from(vec![i as u8]))).collect();
        let mut source = PushSource::spawn(counted(items, &pulls), 1);

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        // One event queued, one held by the blocked send.
        assert!(pulls.load(Ordering::SeqCst) <= 2);

        assert!(matches!(source.next_event().await, PushEvent::Data(_)));
        drop(source);
    }
}
