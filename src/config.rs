//! Tunables for chunking and buffering.

/// Fixed window used to chunk payloads: 4 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Stream sizing shared by sources, adapters and sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Size of each window handed to consumers.
    pub chunk_size: usize,
    /// Events a [`PushSource`](crate::stream::PushSource) may hold before
    /// the drain task stops pulling.
    pub push_capacity: usize,
    /// Number of windows an archive entry producer buffers ahead of reads.
    pub entry_high_water: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            push_capacity: 1,
            entry_high_water: 2,
        }
    }
}

impl BridgeConfig {
    /// Sets the window size. `0` keeps the default.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        self
    }

    pub fn with_push_capacity(mut self, capacity: usize) -> Self {
        self.push_capacity = capacity.max(1);
        self
    }

    pub fn with_entry_high_water(mut self, windows: usize) -> Self {
        self.entry_high_water = windows.max(1);
        self
    }

    /// Byte threshold at which entry producers wait for the consumer.
    pub fn high_water_bytes(&self) -> usize {
        self.chunk_size.saturating_mul(self.entry_high_water)
    }
}
