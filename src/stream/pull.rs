//! Demand-driven view over an event-driven source.
//!
//! The source fires readable/end/error whenever it likes, possibly from a
//! producer thread, while the consumer asks for the next window on its own
//! schedule. Both sides go through one re-entrant lock around [`PullState`]:
//!
//! - `phase` is the tagged `Open` / `Done` / `Errored` state.
//! - `pending` is the single parked request. Settling it consumes the
//!   sender, so a request can never be settled twice.
//! - `in_progress` is set while a window is being extracted from the source.
//!   `read` may deliver "end" synchronously on the same thread; the end
//!   handler must then leave the parked request to the extraction that is
//!   about to satisfy it.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use parking_lot::ReentrantMutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::event::{EventSource, SourceEvent, SourceListener};
use crate::error::{BridgeError, Result};

type Delivery = Result<Option<Bytes>>;

enum Phase {
    Open,
    Done,
    /// Failed; the error is held until a consumer has seen it.
    Errored(Option<BridgeError>),
}

/// The one outstanding "next window" request.
struct PendingRead {
    tx: oneshot::Sender<Delivery>,
}

impl PendingRead {
    fn settle(self, delivery: Delivery) {
        // The receiver is gone if the consumer abandoned the stream.
        let _ = self.tx.send(delivery);
    }

    fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

struct PullState {
    phase: Phase,
    in_progress: bool,
    pending: Option<PendingRead>,
    /// Number of parked requests that were settled.
    settled: u64,
}

impl PullState {
    fn settle(&mut self, delivery: Delivery) {
        if let Some(pending) = self.pending.take() {
            self.settled += 1;
            pending.settle(delivery);
        }
    }

    /// What a consumer gets when the source has nothing more to hand out.
    fn terminal(&mut self) -> Option<Delivery> {
        match &mut self.phase {
            Phase::Open => None,
            Phase::Done => Some(Ok(None)),
            Phase::Errored(err) => Some(match err.take() {
                Some(err) => Err(err),
                None => Ok(None),
            }),
        }
    }

    fn fail(&mut self, err: BridgeError) {
        self.phase = Phase::Errored(Some(err));
    }
}

enum Pull {
    Ready(Delivery),
    Parked(oneshot::Receiver<Delivery>),
}

struct Shared<S> {
    source: S,
    window: usize,
    state: ReentrantMutex<RefCell<PullState>>,
}

impl<S: EventSource> Shared<S> {
    /// Extract one window, mapping a failed read into the error phase.
    fn extract(&self) -> std::result::Result<Option<Bytes>, ()> {
        match self.source.read(self.window) {
            Ok(chunk) => Ok(chunk),
            Err(err) => {
                let guard = self.state.lock();
                guard
                    .borrow_mut()
                    .fail(BridgeError::ArchiveEntryError(err));
                Err(())
            }
        }
    }

    fn pull(&self) -> Pull {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            if let Some(pending) = &state.pending {
                if !pending.is_abandoned() {
                    return Pull::Ready(Err(BridgeError::ConcurrentPull));
                }
                state.pending = None;
            }
            if let Phase::Errored(_) = state.phase {
                if let Some(delivery) = state.terminal() {
                    return Pull::Ready(delivery);
                }
            }
            state.in_progress = true;
        }

        let chunk = self.extract();

        let mut state = guard.borrow_mut();
        state.in_progress = false;
        match chunk {
            Ok(Some(bytes)) => Pull::Ready(Ok(Some(bytes))),
            Ok(None) | Err(()) => match state.terminal() {
                Some(delivery) => Pull::Ready(delivery),
                None => {
                    let (tx, rx) = oneshot::channel();
                    state.pending = Some(PendingRead { tx });
                    trace!("parked pull until the source signals");
                    Pull::Parked(rx)
                }
            },
        }
    }

    fn on_readable(&self) {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            if state.pending.is_none() || state.in_progress {
                return;
            }
            state.in_progress = true;
        }

        let chunk = self.extract();

        let mut state = guard.borrow_mut();
        state.in_progress = false;
        match chunk {
            Ok(Some(bytes)) => state.settle(Ok(Some(bytes))),
            // Spurious wakeup: stay parked unless nothing else can arrive.
            Ok(None) | Err(()) => {
                if let Some(delivery) = state.terminal() {
                    state.settle(delivery);
                }
            }
        }
    }

    fn on_end(&self) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Phase::Open = state.phase {
            state.phase = Phase::Done;
        }
        if state.pending.is_some() && !state.in_progress {
            state.settle(Ok(None));
        }
    }

    fn on_error(&self, err: std::io::Error) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if let Phase::Errored(_) = state.phase {
            return;
        }
        state.fail(BridgeError::ArchiveEntryError(err));
        if state.pending.is_some() && !state.in_progress {
            if let Some(delivery) = state.terminal() {
                state.settle(delivery);
            }
        }
    }
}

/// Forwards source events to the adapter without keeping it alive.
struct Relay<S> {
    shared: Weak<Shared<S>>,
}

impl<S: EventSource + 'static> SourceListener for Relay<S> {
    fn on_event(&self, event: SourceEvent) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        match event {
            SourceEvent::Readable => shared.on_readable(),
            SourceEvent::End => shared.on_end(),
            SourceEvent::Error(err) => shared.on_error(err),
        }
    }
}

/// Exposes an [`EventSource`] as a `Stream` of windows.
///
/// Each poll either takes a window that is already available, or parks one
/// request that the next readable/end/error event settles. Dropping the
/// adapter unsubscribes from the source.
pub struct PullAdapter<S: EventSource + 'static> {
    shared: Arc<Shared<S>>,
    parked: Option<oneshot::Receiver<Delivery>>,
    terminated: bool,
}

impl<S: EventSource + 'static> PullAdapter<S> {
    pub fn new(source: S, window: usize) -> Self {
        let shared = Arc::new(Shared {
            source,
            window: window.max(1),
            state: ReentrantMutex::new(RefCell::new(PullState {
                phase: Phase::Open,
                in_progress: false,
                pending: None,
                settled: 0,
            })),
        });
        let relay = Arc::new(Relay {
            shared: Arc::downgrade(&shared),
        });
        shared.source.subscribe(relay);
        Self {
            shared,
            parked: None,
            terminated: false,
        }
    }

    /// Number of parked pulls that were settled by an event.
    pub fn settled_count(&self) -> u64 {
        self.shared.state.lock().borrow().settled
    }

    /// Whether a pull is currently parked on the source.
    pub fn has_pending(&self) -> bool {
        self.shared.state.lock().borrow().pending.is_some()
    }

    /// Pull the next window.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        use futures::StreamExt;
        self.next().await.transpose()
    }

    fn deliver(&mut self, delivery: Delivery) -> Option<Result<Bytes>> {
        match delivery {
            Ok(Some(bytes)) => Some(Ok(bytes)),
            Ok(None) => {
                debug!("event source drained");
                self.terminated = true;
                None
            }
            Err(err) => {
                self.terminated = true;
                Some(Err(err))
            }
        }
    }
}

impl<S: EventSource + 'static> Stream for PullAdapter<S> {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        let mut rx = match self.parked.take() {
            Some(rx) => rx,
            None => match self.shared.pull() {
                Pull::Ready(delivery) => return Poll::Ready(self.deliver(delivery)),
                Pull::Parked(rx) => rx,
            },
        };

        match Pin::new(&mut rx).poll(cx) {
            Poll::Ready(delivery) => {
                let delivery = delivery.unwrap_or(Err(BridgeError::CancelledByConsumer));
                Poll::Ready(self.deliver(delivery))
            }
            Poll::Pending => {
                self.parked = Some(rx);
                Poll::Pending
            }
        }
    }
}

impl<S: EventSource + 'static> Drop for PullAdapter<S> {
    fn drop(&mut self) {
        self.shared.source.unsubscribe();
        let guard = self.shared.state.lock();
        guard.borrow_mut().pending = None;
    }
}
