//! Read-mostly cache of requests currently being fulfilled.
use std::{
    collections::HashSet,
    sync::{Arc, RwLock},
};

use crate::{log_deduper::LogKey, metrics::MetricsSink};

struct Inner {
    items: HashSet<LogKey>,
    last_prune_height: u64,
}

/// Set of requests with a fulfillment in flight.
///
/// `contains` only takes a read lock, so concurrent lookups do not contend.
/// Pruning piggybacks on `add`, which already holds the write lock.
pub struct InflightCache {
    inner: RwLock<Inner>,
    lookback: u64,
    prune_interval: u64,
    sink: Arc<dyn MetricsSink>,
}

impl InflightCache {
    /// Constructs a cache remembering `lookback` blocks worth of requests.
    pub fn new(lookback: u64, prune_interval: u64, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: HashSet::new(),
                last_prune_height: 0,
            }),
            lookback,
            prune_interval,
            sink,
        }
    }

    /// Marks a request as in flight and prunes entries that fell out of the
    /// lookback window.
    pub fn add(&self, key: LogKey) {
        let mut inner = self.inner.write().unwrap();
        let height = key.block_number;
        inner.items.insert(key);
        if height.saturating_sub(inner.last_prune_height) >= self.prune_interval {
            let cutoff = height.saturating_sub(self.lookback);
            inner.items.retain(|item| item.block_number >= cutoff);
            inner.last_prune_height = height;
        }
        self.sink.update_queue_size(inner.items.len());
    }

    /// Whether a fulfillment of `key` is currently in flight.
    pub fn contains(&self, key: &LogKey) -> bool {
        self.inner.read().unwrap().items.contains(key)
    }
}
