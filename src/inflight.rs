//! Sharing one in-flight operation between concurrent callers.

use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::debug;

use crate::error::BridgeError;
use crate::file::SourceFile;

type Flight<V> = Shared<BoxFuture<'static, V>>;

/// Keyed registry of in-flight futures.
///
/// The first caller for a key starts the work; later callers with the same
/// key await the same future and get a clone of its output. The entry is
/// removed once the work completes, so the next call starts fresh. Every
/// waiter holds the future, which keeps running while any of them is still
/// polling it.
pub struct InFlight<K, V> {
    flights: DashMap<K, (u64, Flight<V>)>,
    next_id: AtomicU64,
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            flights: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key`, or join the run already in flight.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (id, flight) = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                (id, start().boxed().shared())
            })
            .clone();

        let output = flight.await;
        self.flights.remove_if(&key, |_, (current, _)| *current == id);
        output
    }

    /// Number of keys with work in flight.
    pub fn len(&self) -> usize {
        self.flights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.is_empty()
    }
}

/// Whole-payload loads, shared between concurrent callers of the same path.
#[derive(Default)]
pub struct PayloadLoader {
    flights: InFlight<String, Result<Bytes, Arc<BridgeError>>>,
}

impl PayloadLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(&self, file: Arc<SourceFile>) -> Result<Bytes, Arc<BridgeError>> {
        let key = file.path().to_string();
        self.flights
            .run(key, move || async move {
                debug!(path = file.path(), "loading payload");
                file.array_buffer().await.map_err(Arc::new)
            })
            .await
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}
