//! Event-driven ("push") byte sources.
//!
//! A source announces availability on its own schedule through a
//! [`SourceListener`] and hands out bytes through the synchronous
//! [`EventSource::read`] primitive, which is meant to be called from inside
//! a readable handler. Listeners are always invoked without any source lock
//! held, so a handler may call back into `read`, and `read` may itself
//! deliver [`SourceEvent::End`] to the listener on the calling thread.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tokio::sync::Notify;

/// Signals emitted by an event-driven source.
#[derive(Debug)]
pub enum SourceEvent {
    /// Data may be available; a read can still come back empty.
    Readable,
    /// No more data will be produced.
    End,
    Error(io::Error),
}

/// Receives events from an [`EventSource`].
pub trait SourceListener: Send + Sync {
    fn on_event(&self, event: SourceEvent);
}

/// A byte source that pushes availability signals to one listener.
pub trait EventSource: Send + Sync {
    /// Attach the single listener.
    ///
    /// A source that already ended or failed before anyone listened replays
    /// that terminal event to the new listener.
    fn subscribe(&self, listener: Arc<dyn SourceListener>);

    /// Detach the listener and release whatever feeds the source.
    fn unsubscribe(&self);

    /// Take up to `max_bytes` without blocking. `Ok(None)` means nothing is
    /// ready right now, or nothing is left.
    fn read(&self, max_bytes: usize) -> io::Result<Option<Bytes>>;
}

impl<S: EventSource + ?Sized> EventSource for Arc<S> {
    fn subscribe(&self, listener: Arc<dyn SourceListener>) {
        (**self).subscribe(listener)
    }

    fn unsubscribe(&self) {
        (**self).unsubscribe()
    }

    fn read(&self, max_bytes: usize) -> io::Result<Option<Bytes>> {
        (**self).read(max_bytes)
    }
}

#[derive(Default)]
struct BufferState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    finished: bool,
    end_emitted: bool,
    failed: bool,
    /// Largest window a reader has asked for; raises the high-water mark.
    demand: usize,
    /// Error raised before a listener was attached.
    unreported: Option<io::Error>,
    detached: bool,
    listener: Option<Arc<dyn SourceListener>>,
}

impl BufferState {
    /// Claim the one-time end notification if the buffer is drained.
    fn claim_end(&mut self) -> Option<Arc<dyn SourceListener>> {
        if self.finished && self.buffered == 0 && !self.end_emitted && !self.failed {
            let listener = self.listener.clone()?;
            self.end_emitted = true;
            return Some(listener);
        }
        None
    }

    fn take(&mut self, len: usize) -> Bytes {
        self.buffered -= len;
        let Some(front) = self.chunks.front_mut() else {
            return Bytes::new();
        };
        if front.len() >= len {
            let out = front.split_to(len);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            return out;
        }

        let mut out = BytesMut::with_capacity(len);
        while out.len() < len {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let wanted = len - out.len();
            if chunk.len() > wanted {
                out.extend_from_slice(&chunk.split_to(wanted));
                self.chunks.push_front(chunk);
            } else {
                out.extend_from_slice(&chunk);
            }
        }
        out.freeze()
    }
}

/// Bounded buffer that turns a producer's writes into readable/end/error
/// events.
///
/// `read(n)` hands out exactly `n` bytes once that many are buffered and
/// nothing before that, except after [`finish`](Self::finish): then the
/// remainder is returned and "end" fires as soon as the buffer drains.
/// Producers call [`ready`](Self::ready) before each push to respect the
/// high-water mark. A read asking for more than the mark raises it to that
/// size, so a window larger than the mark can still fill up.
pub struct EventBuffer {
    state: Mutex<BufferState>,
    space: Notify,
    high_water: usize,
}

impl EventBuffer {
    pub fn new(high_water: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            space: Notify::new(),
            high_water: high_water.max(1),
        }
    }

    /// Wait until there is room below the high-water mark.
    ///
    /// Returns `false` once the consumer has detached; the producer should
    /// stop.
    pub async fn ready(&self) -> bool {
        loop {
            let notified = self.space.notified();
            {
                let state = self.state.lock();
                if state.detached {
                    return false;
                }
                if state.buffered < self.high_water.max(state.demand) {
                    return true;
                }
            }
            notified.await;
        }
    }

    /// Append bytes and announce them.
    pub fn push(&self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        let listener = {
            let mut state = self.state.lock();
            if state.detached || state.finished || state.failed {
                return;
            }
            state.buffered += bytes.len();
            state.chunks.push_back(bytes);
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener.on_event(SourceEvent::Readable);
        }
    }

    /// Mark the end of the data.
    pub fn finish(&self) {
        let (listener, event) = {
            let mut state = self.state.lock();
            if state.finished || state.failed {
                return;
            }
            state.finished = true;
            match state.claim_end() {
                Some(listener) => (Some(listener), SourceEvent::End),
                // The tail is shorter than a window; wake the reader so it
                // can drain it now that the source is finished.
                None => (state.listener.clone(), SourceEvent::Readable),
            }
        };
        if let Some(listener) = listener {
            listener.on_event(event);
        }
    }

    /// Fail the source. Buffered bytes are dropped.
    pub fn fail(&self, err: io::Error) {
        let listener = {
            let mut state = self.state.lock();
            if state.failed || state.end_emitted {
                return;
            }
            state.failed = true;
            state.chunks.clear();
            state.buffered = 0;
            match state.listener.clone() {
                Some(listener) => listener,
                None => {
                    state.unreported = Some(err);
                    return;
                }
            }
        };
        self.space.notify_one();
        listener.on_event(SourceEvent::Error(err));
    }

    pub fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    pub fn buffered(&self) -> usize {
        self.state.lock().buffered
    }
}

impl EventSource for EventBuffer {
    fn subscribe(&self, listener: Arc<dyn SourceListener>) {
        let replay = {
            let mut state = self.state.lock();
            state.listener = Some(listener.clone());
            if let Some(err) = state.unreported.take() {
                Some(SourceEvent::Error(err))
            } else if state.claim_end().is_some() {
                Some(SourceEvent::End)
            } else if state.buffered > 0 {
                Some(SourceEvent::Readable)
            } else {
                None
            }
        };
        if let Some(event) = replay {
            listener.on_event(event);
        }
    }

    fn unsubscribe(&self) {
        {
            let mut state = self.state.lock();
            state.listener = None;
            state.detached = true;
            state.chunks.clear();
            state.buffered = 0;
        }
        self.space.notify_one();
    }

    fn read(&self, max_bytes: usize) -> io::Result<Option<Bytes>> {
        let max_bytes = max_bytes.max(1);
        let (chunk, end) = {
            let mut state = self.state.lock();
            if state.failed {
                return Ok(None);
            }
            if state.buffered == 0 || (state.buffered < max_bytes && !state.finished) {
                let raised = max_bytes > state.demand.max(self.high_water);
                state.demand = state.demand.max(max_bytes);
                drop(state);
                if raised {
                    self.space.notify_one();
                }
                return Ok(None);
            }
            let len = state.buffered.min(max_bytes);
            let chunk = state.take(len);
            (chunk, state.claim_end())
        };
        self.space.notify_one();
        if let Some(listener) = end {
            listener.on_event(SourceEvent::End);
        }
        Ok(Some(chunk))
    }
}
